use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

// Health check endpoint - lightweight, no rate limiting
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// Readiness probe: checks DB connectivity with timeout protection
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    // Add timeout to prevent hanging readiness checks
    let query = sqlx::query("SELECT 1").fetch_one(&state.db);
    match tokio::time::timeout(std::time::Duration::from_secs(5), query).await {
        Ok(Ok(_)) => (StatusCode::OK, "ready").into_response(),
        Ok(Err(e)) => (StatusCode::SERVICE_UNAVAILABLE, format!("not ready: {}", e)).into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready: timeout").into_response(),
    }
}

// Metrics endpoint: returns JSON snapshot
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.get_snapshot();
    Json(snapshot)
}

// Prometheus-compatible text exposition format
pub async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    let m = state.metrics.get_snapshot();
    let body = format!(
        "# HELP medmarkt_users_registered Total users registered\n# TYPE medmarkt_users_registered counter\nmedmarkt_users_registered {}\n\
# HELP medmarkt_logins_succeeded Successful logins\n# TYPE medmarkt_logins_succeeded counter\nmedmarkt_logins_succeeded {}\n\
# HELP medmarkt_logins_failed Failed logins\n# TYPE medmarkt_logins_failed counter\nmedmarkt_logins_failed {}\n\
# HELP medmarkt_orders_created Orders created\n# TYPE medmarkt_orders_created counter\nmedmarkt_orders_created {}\n\
# HELP medmarkt_orders_delivered Orders delivered\n# TYPE medmarkt_orders_delivered counter\nmedmarkt_orders_delivered {}\n\
# HELP medmarkt_orders_cancelled Orders cancelled\n# TYPE medmarkt_orders_cancelled counter\nmedmarkt_orders_cancelled {}\n\
# HELP medmarkt_emails_sent Emails sent\n# TYPE medmarkt_emails_sent counter\nmedmarkt_emails_sent {}\n\
# HELP medmarkt_emails_failed Emails failed\n# TYPE medmarkt_emails_failed counter\nmedmarkt_emails_failed {}\n\
# HELP medmarkt_uptime_seconds Uptime seconds\n# TYPE medmarkt_uptime_seconds gauge\nmedmarkt_uptime_seconds {}\n",
        m.users_registered,
        m.logins_succeeded,
        m.logins_failed,
        m.orders_created,
        m.orders_delivered,
        m.orders_cancelled,
        m.emails_sent,
        m.emails_failed,
        m.uptime_seconds,
    );
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

// Version/Build info endpoint (JSON)
pub async fn version() -> impl IntoResponse {
    let body = serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "package": {
            "description": env!("CARGO_PKG_DESCRIPTION"),
            "authors": env!("CARGO_PKG_AUTHORS"),
            "license": env!("CARGO_PKG_LICENSE"),
        },
        "build": {
            "profile": if cfg!(debug_assertions) { "debug" } else { "release" },
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        }
    });
    (StatusCode::OK, Json(body))
}
