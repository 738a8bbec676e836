#[cfg(test)]
mod tests {
    use crate::config::{ensure_sqlite_parent_dir, validate, AppConfig};

    #[test]
    fn test_embedded_defaults_parse() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 8080);
        assert!(cfg.database.url.starts_with("sqlite://"));
        assert!(cfg.auth.jwt_secret.len() >= 32);
        assert_eq!(cfg.auth.access_token_minutes, 15);
        assert_eq!(cfg.auth.refresh_token_days, 7);
        assert!(cfg.mail.api_key.is_empty());
        assert!(cfg.orders.default_delivery_fee >= 0.0);
    }

    #[test]
    fn test_defaults_pass_validation() {
        let cfg = AppConfig::default();
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_validate_rejects_short_jwt_secret() {
        let mut cfg = AppConfig::default();
        cfg.auth.jwt_secret = "short".to_string();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut cfg = AppConfig::default();
        cfg.server.port = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_validate_rejects_negative_delivery_fee() {
        let mut cfg = AppConfig::default();
        cfg.orders.default_delivery_fee = -1.0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_validate_rejects_nonpositive_token_lifetimes() {
        let mut cfg = AppConfig::default();
        cfg.auth.access_token_minutes = 0;
        assert!(validate(&cfg).is_err());

        let mut cfg = AppConfig::default();
        cfg.auth.token_expiry_hours = -1;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_validate_mail_requires_api_url() {
        let mut cfg = AppConfig::default();
        cfg.mail.api_key = "SG.example".to_string();
        cfg.mail.api_url = String::new();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_ensure_sqlite_parent_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/nested/data/app.db", tmp.path().display());
        ensure_sqlite_parent_dir(&url).unwrap();
        assert!(tmp.path().join("nested/data").is_dir());
        // Non-sqlite URLs are left alone
        ensure_sqlite_parent_dir("postgres://localhost/db").unwrap();
    }
}
