use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit::{self, AuditEntry},
    auth as tokens,
    error::{AppError, AppResult},
    middleware::ip::extract_ip_from_headers,
    middleware::validation::{sanitize_string, validate_password, validate_phone},
    middleware::AuthUser,
    state::AppState,
    types::*,
};

use super::auth::{agent, fetch_user, user_dto};

pub async fn get_me(State(state): State<AppState>, user: AuthUser) -> AppResult<impl IntoResponse> {
    let row = fetch_user(&state.db, user.id).await?;
    Ok(Json(user_dto(&row)?))
}

pub async fn update_me(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> AppResult<impl IntoResponse> {
    if let Some(name) = &req.full_name {
        let name = sanitize_string(name, 120);
        if name.is_empty() {
            return Err(AppError::ValidationError {
                field: "full_name".to_string(),
                message: "Full name must not be empty".to_string(),
            });
        }
        sqlx::query("UPDATE users SET full_name = ?1 WHERE id = ?2")
            .bind(&name)
            .bind(user.id.to_string())
            .execute(&state.db)
            .await?;
    }

    if let Some(phone) = &req.phone {
        validate_phone(phone)?;
        let taken: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE phone = ?1 AND id != ?2")
            .bind(phone.trim())
            .bind(user.id.to_string())
            .fetch_optional(&state.db)
            .await?;
        if taken.is_some() {
            return Err(AppError::Conflict("This phone number is already in use".to_string()));
        }
        sqlx::query("UPDATE users SET phone = ?1 WHERE id = ?2")
            .bind(phone.trim())
            .bind(user.id.to_string())
            .execute(&state.db)
            .await?;
    }

    let row = fetch_user(&state.db, user.id).await?;
    Ok(Json(user_dto(&row)?))
}

pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<ChangePasswordRequest>,
) -> AppResult<impl IntoResponse> {
    let row = fetch_user(&state.db, user.id).await?;
    if !tokens::verify_password(&req.current_password, &row.password_hash)? {
        return Err(AppError::Unauthorized("Current password is incorrect".to_string()));
    }
    validate_password(&req.new_password)?;

    let hash = tokens::hash_password(&req.new_password)?;
    sqlx::query("UPDATE users SET password_hash = ?1 WHERE id = ?2")
        .bind(&hash)
        .bind(user.id.to_string())
        .execute(&state.db)
        .await?;

    audit::record(&state.db, AuditEntry::new("user.password_change").user(user.id).target("user", user.id));
    Ok(Json(json!({ "message": "Password updated" })))
}

pub async fn deactivate_me(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(req): Json<DeactivateRequest>,
) -> AppResult<impl IntoResponse> {
    let row = fetch_user(&state.db, user.id).await?;
    if !tokens::verify_password(&req.password, &row.password_hash)? {
        return Err(AppError::Unauthorized("Password is incorrect".to_string()));
    }

    sqlx::query("UPDATE users SET is_active = 0 WHERE id = ?1")
        .bind(user.id.to_string())
        .execute(&state.db)
        .await?;

    let ip = extract_ip_from_headers(&headers, None);
    audit::record(
        &state.db,
        AuditEntry::new("user.deactivate")
            .user(user.id)
            .target("user", user.id)
            .describe("self-service deactivation")
            .client(Some(ip.to_string()), agent(&headers)),
    );
    Ok(Json(json!({ "message": "Account deactivated" })))
}

// ---- addresses ----

#[derive(sqlx::FromRow)]
struct AddressRow {
    id: String,
    label: String,
    street: String,
    district: String,
    city: String,
    details: Option<String>,
    is_primary: i64,
}

fn address_dto(row: &AddressRow) -> AppResult<AddressDto> {
    let id = Uuid::parse_str(&row.id)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt address id: {}", e)))?;
    Ok(AddressDto {
        id,
        label: row.label.clone(),
        street: row.street.clone(),
        district: row.district.clone(),
        city: row.city.clone(),
        details: row.details.clone(),
        is_primary: row.is_primary != 0,
    })
}

async fn list_address_rows(db: &sqlx::SqlitePool, user_id: Uuid) -> AppResult<Vec<AddressRow>> {
    let rows = sqlx::query_as::<_, AddressRow>(
        "SELECT id, label, street, district, city, details, is_primary FROM user_addresses WHERE user_id = ?1 ORDER BY is_primary DESC, created_at",
    )
    .bind(user_id.to_string())
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn list_addresses(State(state): State<AppState>, user: AuthUser) -> AppResult<impl IntoResponse> {
    let rows = list_address_rows(&state.db, user.id).await?;
    let dtos: Vec<AddressDto> = rows.iter().map(address_dto).collect::<AppResult<_>>()?;
    Ok(Json(dtos))
}

fn validate_address(req: &UpsertAddressRequest) -> AppResult<(String, String, String, String, Option<String>)> {
    let label = sanitize_string(&req.label, 60);
    let street = sanitize_string(&req.street, 200);
    let district = sanitize_string(&req.district, 120);
    let city = sanitize_string(&req.city, 120);
    if label.is_empty() || street.is_empty() || district.is_empty() || city.is_empty() {
        return Err(AppError::ValidationError {
            field: "address".to_string(),
            message: "Label, street, district and city are required".to_string(),
        });
    }
    let details = req.details.as_deref().map(|d| sanitize_string(d, 250));
    Ok((label, street, district, city, details))
}

pub async fn create_address(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<UpsertAddressRequest>,
) -> AppResult<impl IntoResponse> {
    let (label, street, district, city, details) = validate_address(&req)?;

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_addresses WHERE user_id = ?1")
        .bind(user.id.to_string())
        .fetch_one(&state.db)
        .await?;

    // The first address always becomes primary
    let is_primary = count == 0 || req.is_primary.unwrap_or(false);
    let id = Uuid::new_v4();

    let mut tx = state.db.begin().await?;
    if is_primary {
        sqlx::query("UPDATE user_addresses SET is_primary = 0 WHERE user_id = ?1")
            .bind(user.id.to_string())
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query(
        r#"INSERT INTO user_addresses (id, user_id, label, street, district, city, details, is_primary)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
    )
    .bind(id.to_string())
    .bind(user.id.to_string())
    .bind(&label)
    .bind(&street)
    .bind(&district)
    .bind(&city)
    .bind(&details)
    .bind(is_primary as i64)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(AddressDto { id, label, street, district, city, details, is_primary }),
    ))
}

pub async fn update_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpsertAddressRequest>,
) -> AppResult<impl IntoResponse> {
    let (label, street, district, city, details) = validate_address(&req)?;

    let existing: Option<(String,)> =
        sqlx::query_as("SELECT id FROM user_addresses WHERE id = ?1 AND user_id = ?2")
            .bind(id.to_string())
            .bind(user.id.to_string())
            .fetch_optional(&state.db)
            .await?;
    if existing.is_none() {
        return Err(AppError::NotFound("Address not found".to_string()));
    }

    let make_primary = req.is_primary.unwrap_or(false);
    let mut tx = state.db.begin().await?;
    if make_primary {
        sqlx::query("UPDATE user_addresses SET is_primary = 0 WHERE user_id = ?1")
            .bind(user.id.to_string())
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query(
        r#"UPDATE user_addresses
           SET label = ?1, street = ?2, district = ?3, city = ?4, details = ?5,
               is_primary = CASE WHEN ?6 THEN 1 ELSE is_primary END
           WHERE id = ?7"#,
    )
    .bind(&label)
    .bind(&street)
    .bind(&district)
    .bind(&city)
    .bind(&details)
    .bind(make_primary as i64)
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let rows = list_address_rows(&state.db, user.id).await?;
    let dtos: Vec<AddressDto> = rows.iter().map(address_dto).collect::<AppResult<_>>()?;
    Ok(Json(dtos))
}

pub async fn delete_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let rows = list_address_rows(&state.db, user.id).await?;
    let target = rows
        .iter()
        .find(|r| r.id == id.to_string())
        .ok_or_else(|| AppError::NotFound("Address not found".to_string()))?;

    // The only address cannot be removed: orders need a delivery target
    if rows.len() == 1 {
        return Err(AppError::BadRequest("Cannot delete the only address".to_string()));
    }

    let was_primary = target.is_primary != 0;
    let mut tx = state.db.begin().await?;
    sqlx::query("DELETE FROM user_addresses WHERE id = ?1").bind(id.to_string()).execute(&mut *tx).await?;
    if was_primary {
        // Promote the oldest remaining address
        sqlx::query(
            r#"UPDATE user_addresses SET is_primary = 1
               WHERE id = (SELECT id FROM user_addresses WHERE user_id = ?1 ORDER BY created_at LIMIT 1)"#,
        )
        .bind(user.id.to_string())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(Json(json!({ "message": "Address deleted" })))
}
