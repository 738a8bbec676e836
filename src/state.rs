use std::sync::Arc;

use crate::config::AppConfig;
use crate::mail::Mailer;
use crate::metrics::Metrics;
use crate::middleware::EndpointRateLimiter;

/// The shared application state.
///
/// Holds the core shared data structures accessed across HTTP handlers,
/// middleware, and background tasks. Thread-safe and cloneable for use with
/// Axum's request extraction system.
#[derive(Clone)]
pub struct AppState {
    /// The database connection pool.
    pub db: sqlx::SqlitePool,
    /// The application configuration.
    pub config: Arc<AppConfig>,
    /// The application metrics.
    pub metrics: Metrics,
    /// The per-endpoint rate limiter.
    pub rate_limiter: EndpointRateLimiter,
    /// Outgoing transactional mail. No-op when no API key is configured.
    pub mailer: Arc<Mailer>,
}

impl AppState {
    /// Creates a new `AppState` with initialized components.
    ///
    /// Endpoint rate limits protect the credential and search surfaces:
    /// - 10 logins per minute
    /// - 5 registrations per minute
    /// - 5 password-reset or verification-resend requests per minute
    /// - 300 searches per minute
    pub fn new(db: sqlx::SqlitePool, config: AppConfig) -> Self {
        let rate_limiter = EndpointRateLimiter::new().with_limits(vec![
            ("/api/auth/login", 10, 60),
            ("/api/auth/register", 5, 60),
            ("/api/auth/forgot-password", 5, 60),
            ("/api/auth/resend-verification", 5, 60),
            ("/api/search", 300, 60),
        ]);

        let mailer = Arc::new(Mailer::new(config.mail.clone()));

        Self { db, config: Arc::new(config), metrics: Metrics::new(), rate_limiter, mailer }
    }
}
