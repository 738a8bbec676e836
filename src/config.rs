use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
    /// Hours before an email-verification or password-reset token expires.
    pub token_expiry_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// When empty, outgoing mail is logged and skipped.
    pub api_key: String,
    pub api_url: String,
    pub from_email: String,
    pub from_name: String,
    /// Base URL used in verification and reset links.
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrdersConfig {
    pub default_delivery_fee: f64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub mail: MailConfig,
    pub orders: OrdersConfig,
    pub security: Option<SecurityConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        let defaults: &str = include_str!("../config/default.toml");
        match ::config::Config::builder()
            .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => {
                    eprintln!("FATAL: Failed to deserialize default config: {}", e);
                    panic!("Failed to deserialize default config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let defaults: &str = include_str!("../config/default.toml");
    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
        // Optional local file: medmarkt.toml (in CWD)
        .add_source(::config::File::with_name("medmarkt").required(false));

    if let Ok(custom_path) = std::env::var("MEDMARKT_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(::config::Environment::with_prefix("MEDMARKT").separator("__"));

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub(crate) fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    // Server
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    // Warn for privileged ports on Unix-like systems
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }

    // Auth
    if cfg.auth.jwt_secret.len() < 32 {
        return Err(anyhow::anyhow!("auth.jwt_secret must be at least 32 characters"));
    }
    if cfg.auth.access_token_minutes <= 0 {
        return Err(anyhow::anyhow!("auth.access_token_minutes must be > 0"));
    }
    if cfg.auth.refresh_token_days <= 0 {
        return Err(anyhow::anyhow!("auth.refresh_token_days must be > 0"));
    }
    if cfg.auth.token_expiry_hours <= 0 {
        return Err(anyhow::anyhow!("auth.token_expiry_hours must be > 0"));
    }

    // Orders
    if cfg.orders.default_delivery_fee < 0.0 {
        return Err(anyhow::anyhow!("orders.default_delivery_fee must be >= 0"));
    }

    // Mail is optional, but when an API key is present the rest must be usable
    if !cfg.mail.api_key.is_empty() {
        if cfg.mail.api_url.is_empty() {
            return Err(anyhow::anyhow!("mail.api_url must be set when mail.api_key is set"));
        }
        if cfg.mail.from_email.is_empty() {
            return Err(anyhow::anyhow!("mail.from_email must be set when mail.api_key is set"));
        }
    }

    Ok(())
}

pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
