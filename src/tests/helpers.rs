//! Shared setup for API tests: a throwaway SQLite database, the full router,
//! and shortcuts for seeding users, pharmacies, and products.

use axum::middleware::{from_fn, from_fn_with_state};
use axum::{
    body::Body,
    http::{header, Method, Request},
    response::Response,
    routing::{get, post, put},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::auth::issue_access_token;
use crate::config::AppConfig;
use crate::routes;
use crate::state::AppState;
use crate::types::UserRole;

pub const TEST_PASSWORD: &str = "Str0ng-Passph4se";

pub async fn setup_test_app() -> (Router, AppState, NamedTempFile) {
    let temp_db = NamedTempFile::new().unwrap();
    let db_url = format!("sqlite:{}", temp_db.path().display());

    sqlx::Sqlite::create_database(&db_url).await.unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                let _ = sqlx::query("PRAGMA foreign_keys=ON;").execute(&mut *conn).await;
                Ok(())
            })
        })
        .connect(&db_url)
        .await
        .unwrap();
    crate::db::init_db(&pool).await.unwrap();

    let mut config = AppConfig::default();
    config.database.url = db_url;

    let state = AppState::new(pool, config);
    let app = build_router(state.clone());
    (app, state, temp_db)
}

fn build_router(state: AppState) -> Router {
    let cfg_arc = state.config.clone();
    Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/readyz", get(routes::health::readyz))
        .route("/metrics", get(routes::health::metrics))
        .route("/metrics/prometheus", get(routes::health::metrics_prometheus))
        .route("/version", get(routes::health::version))
        .route("/api/auth/register", post(routes::auth::register))
        .route("/api/auth/verify-email", post(routes::auth::verify_email))
        .route("/api/auth/resend-verification", post(routes::auth::resend_verification))
        .route("/api/auth/login", post(routes::auth::login))
        .route("/api/auth/refresh", post(routes::auth::refresh))
        .route("/api/auth/forgot-password", post(routes::auth::forgot_password))
        .route("/api/auth/reset-password", post(routes::auth::reset_password))
        .route(
            "/api/users/me",
            get(routes::users::get_me).put(routes::users::update_me).delete(routes::users::deactivate_me),
        )
        .route("/api/users/me/password", put(routes::users::change_password))
        .route(
            "/api/users/me/addresses",
            get(routes::users::list_addresses).post(routes::users::create_address),
        )
        .route(
            "/api/users/me/addresses/{id}",
            put(routes::users::update_address).delete(routes::users::delete_address),
        )
        .route("/api/pharmacies", get(routes::pharmacies::list_pharmacies))
        .route(
            "/api/pharmacies/me",
            get(routes::pharmacies::get_my_pharmacy).put(routes::pharmacies::update_my_pharmacy),
        )
        .route(
            "/api/pharmacies/me/products",
            get(routes::pharmacies::list_my_products).post(routes::pharmacies::create_product),
        )
        .route(
            "/api/pharmacies/me/products/{id}",
            put(routes::pharmacies::update_product).delete(routes::pharmacies::delete_product),
        )
        .route("/api/pharmacies/{id}", get(routes::pharmacies::get_pharmacy))
        .route("/api/products", get(routes::products::list_products))
        .route("/api/products/{id}", get(routes::products::get_product))
        .route("/api/categories", get(routes::products::list_categories))
        .route("/api/search/products", get(routes::search::search_products))
        .route("/api/search/pharmacies", get(routes::search::search_pharmacies))
        .route("/api/search/suggestions", get(routes::search::suggestions))
        .route("/api/cart", get(routes::cart::get_cart).delete(routes::cart::clear_cart))
        .route("/api/cart/count", get(routes::cart::cart_count))
        .route("/api/cart/items", post(routes::cart::add_item))
        .route(
            "/api/cart/items/{id}",
            put(routes::cart::update_item).delete(routes::cart::remove_item),
        )
        .route("/api/orders", post(routes::orders::create_order).get(routes::orders::list_orders))
        .route("/api/orders/{id}", get(routes::orders::get_order))
        .route("/api/orders/{id}/status", put(routes::orders::update_status))
        .route("/api/orders/{id}/cancel", post(routes::orders::cancel_order))
        .route("/api/admin/dashboard", get(routes::admin::dashboard))
        .route("/api/admin/users", get(routes::admin::list_users))
        .route("/api/admin/users/{id}/status", put(routes::admin::update_user_status))
        .route("/api/admin/pharmacies/pending", get(routes::admin::pending_pharmacies))
        .route("/api/admin/pharmacies/{id}/verify", put(routes::admin::verify_pharmacy))
        .route("/api/admin/audit-log", get(routes::admin::audit_log))
        .route("/api/admin/settings", get(routes::admin::list_settings))
        .route("/api/admin/settings/{key}", put(routes::admin::update_setting))
        .route("/api/districts", get(routes::admin::list_districts))
        .with_state(state)
        .layer(from_fn(crate::middleware::validation::validate_request_middleware))
        .layer(from_fn_with_state(
            cfg_arc,
            crate::middleware::security_headers::security_headers_middleware,
        ))
}

pub fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// Inserts a verified, active user and mints an access token for them.
pub async fn create_user(state: &AppState, email: &str, role: UserRole) -> (Uuid, String) {
    let id = Uuid::new_v4();
    let hash = crate::auth::hash_password(TEST_PASSWORD).unwrap();
    // Phone uniqueness: derive digits from the uuid
    let phone = format!("+9677{:08}", id.as_u128() % 100_000_000);
    sqlx::query(
        r#"INSERT INTO users (id, email, phone, password_hash, full_name, role, is_active, email_verified)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, 1)"#,
    )
    .bind(id.to_string())
    .bind(email)
    .bind(phone)
    .bind(hash)
    .bind("Test User")
    .bind(role.as_str())
    .execute(&state.db)
    .await
    .unwrap();
    let token = issue_access_token(&state.config.auth, id, role).unwrap();
    (id, token)
}

pub async fn create_pharmacy(state: &AppState, owner_id: Uuid, name: &str, verified: bool) -> Uuid {
    let id = Uuid::new_v4();
    let status = if verified { "verified" } else { "pending" };
    sqlx::query(
        r#"INSERT INTO pharmacies
            (id, owner_id, name, license_number, address, district, latitude, longitude, delivery_fee, verification_status)
           VALUES (?1, ?2, ?3, ?4, 'Test St 1', 'Hadda', 15.3694, 44.191, 500.0, ?5)"#,
    )
    .bind(id.to_string())
    .bind(owner_id.to_string())
    .bind(name)
    .bind(format!("LIC-{}", &id.to_string()[..8]))
    .bind(status)
    .execute(&state.db)
    .await
    .unwrap();
    id
}

/// Returns a seeded category id.
pub async fn any_category(state: &AppState) -> Uuid {
    let (id,): (String,) = sqlx::query_as("SELECT id FROM categories ORDER BY name LIMIT 1")
        .fetch_one(&state.db)
        .await
        .unwrap();
    Uuid::parse_str(&id).unwrap()
}

pub async fn create_product(
    state: &AppState,
    pharmacy_id: Uuid,
    name: &str,
    price: f64,
    stock: i64,
) -> Uuid {
    let id = Uuid::new_v4();
    let category = any_category(state).await;
    sqlx::query(
        r#"INSERT INTO products (id, pharmacy_id, category_id, name, price, quantity_in_stock, status)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active')"#,
    )
    .bind(id.to_string())
    .bind(pharmacy_id.to_string())
    .bind(category.to_string())
    .bind(name)
    .bind(price)
    .bind(stock)
    .execute(&state.db)
    .await
    .unwrap();
    id
}

pub async fn create_address(state: &AppState, user_id: Uuid) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO user_addresses (id, user_id, label, street, district, city, is_primary)
           VALUES (?1, ?2, 'Home', '12 Zubairi St', 'Hadda', 'Sanaa', 1)"#,
    )
    .bind(id.to_string())
    .bind(user_id.to_string())
    .execute(&state.db)
    .await
    .unwrap();
    id
}
