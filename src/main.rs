use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::{
    routing::{get, post, put},
    Router,
};
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Sqlite};
use tokio::time::{self, Duration as TokioDuration};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod audit;
mod auth;
mod config;
mod db;
mod error;
mod mail;
mod metrics;
mod middleware;
mod routes;
mod state;
mod types;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging (stdout + daily file rotation under ./logs)
    std::fs::create_dir_all("logs").ok();
    let (stdout_nb, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let file_appender = tracing_appender::rolling::daily("logs", "medmarkt.log");
    let (file_nb, file_guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(stdout_nb))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_nb))
        .init();
    // Keep the guards alive so the non-blocking writers flush on shutdown
    let _log_guards = (stdout_guard, file_guard);

    // Load configuration (embedded defaults -> medmarkt.toml -> env/.env)
    let app_cfg = config::load()?;

    // Prepare data dir (if sqlite)
    let db_url = &app_cfg.database.url;
    config::ensure_sqlite_parent_dir(db_url)?;
    if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
        info!("Creating SQLite database at {}", db_url);
        Sqlite::create_database(db_url).await?;
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                let _ = sqlx::query("PRAGMA foreign_keys=ON;").execute(&mut *conn).await;
                let _ = sqlx::query("PRAGMA busy_timeout=10000;").execute(&mut *conn).await;
                let _ = sqlx::query("PRAGMA cache_size=-65536;").execute(&mut *conn).await;
                let _ = sqlx::query("PRAGMA temp_store=MEMORY;").execute(&mut *conn).await;
                Ok(())
            })
        })
        .connect(db_url)
        .await?;

    // Initialize DB schema and seed data
    db::init_db(&pool).await?;

    // App state (includes rate limiting and mailer)
    let state = AppState::new(pool.clone(), app_cfg.clone());

    // Spawn periodic cleanup for per-endpoint rate limiters to avoid memory growth
    {
        let rl = state.rate_limiter.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(TokioDuration::from_secs(300));
            loop {
                ticker.tick().await;
                rl.cleanup_all().await;
            }
        });
    }

    // Clone config Arc for stateful middleware
    let cfg_arc = state.config.clone();

    let app = Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/readyz", get(routes::health::readyz))
        .route("/metrics", get(routes::health::metrics))
        .route("/metrics/prometheus", get(routes::health::metrics_prometheus))
        .route("/version", get(routes::health::version))
        // auth
        .route("/api/auth/register", post(routes::auth::register))
        .route("/api/auth/verify-email", post(routes::auth::verify_email))
        .route("/api/auth/resend-verification", post(routes::auth::resend_verification))
        .route("/api/auth/login", post(routes::auth::login))
        .route("/api/auth/refresh", post(routes::auth::refresh))
        .route("/api/auth/forgot-password", post(routes::auth::forgot_password))
        .route("/api/auth/reset-password", post(routes::auth::reset_password))
        // users
        .route("/api/users/me", get(routes::users::get_me).put(routes::users::update_me).delete(routes::users::deactivate_me))
        .route("/api/users/me/password", put(routes::users::change_password))
        .route("/api/users/me/addresses", get(routes::users::list_addresses).post(routes::users::create_address))
        .route(
            "/api/users/me/addresses/{id}",
            put(routes::users::update_address).delete(routes::users::delete_address),
        )
        // pharmacies
        .route("/api/pharmacies", get(routes::pharmacies::list_pharmacies))
        .route("/api/pharmacies/me", get(routes::pharmacies::get_my_pharmacy).put(routes::pharmacies::update_my_pharmacy))
        .route(
            "/api/pharmacies/me/products",
            get(routes::pharmacies::list_my_products).post(routes::pharmacies::create_product),
        )
        .route(
            "/api/pharmacies/me/products/{id}",
            put(routes::pharmacies::update_product).delete(routes::pharmacies::delete_product),
        )
        .route("/api/pharmacies/{id}", get(routes::pharmacies::get_pharmacy))
        // products & categories
        .route("/api/products", get(routes::products::list_products))
        .route("/api/products/{id}", get(routes::products::get_product))
        .route("/api/categories", get(routes::products::list_categories))
        // search
        .route("/api/search/products", get(routes::search::search_products))
        .route("/api/search/pharmacies", get(routes::search::search_pharmacies))
        .route("/api/search/suggestions", get(routes::search::suggestions))
        // cart
        .route("/api/cart", get(routes::cart::get_cart).delete(routes::cart::clear_cart))
        .route("/api/cart/count", get(routes::cart::cart_count))
        .route("/api/cart/items", post(routes::cart::add_item))
        .route("/api/cart/items/{id}", put(routes::cart::update_item).delete(routes::cart::remove_item))
        // orders
        .route("/api/orders", post(routes::orders::create_order).get(routes::orders::list_orders))
        .route("/api/orders/{id}", get(routes::orders::get_order))
        .route("/api/orders/{id}/status", put(routes::orders::update_status))
        .route("/api/orders/{id}/cancel", post(routes::orders::cancel_order))
        // admin
        .route("/api/admin/dashboard", get(routes::admin::dashboard))
        .route("/api/admin/users", get(routes::admin::list_users))
        .route("/api/admin/users/{id}/status", put(routes::admin::update_user_status))
        .route("/api/admin/pharmacies/pending", get(routes::admin::pending_pharmacies))
        .route("/api/admin/pharmacies/{id}/verify", put(routes::admin::verify_pharmacy))
        .route("/api/admin/audit-log", get(routes::admin::audit_log))
        .route("/api/admin/settings", get(routes::admin::list_settings))
        .route("/api/admin/settings/{key}", put(routes::admin::update_setting))
        // public reference data
        .route("/api/districts", get(routes::admin::list_districts))
        .with_state(state)
        // Global body limit (10 MB)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(from_fn(middleware::validation::validate_request_middleware))
        .layer(from_fn(middleware::rate_limit::rate_limit_middleware))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(cfg_arc, middleware::security_headers::security_headers_middleware));

    // CORS: permissive in debug for local frontend development, same-origin in release
    let app = if cfg!(debug_assertions) { app.layer(CorsLayer::permissive()) } else { app };

    // Server listen addr (from config)
    let port: u16 = app_cfg.server.port;
    let host: String = app_cfg.server.host.clone();
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen addr {}:{} - {}", host, port, e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("MedMarkt listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received. Stopping server...");
}
