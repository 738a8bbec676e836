use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit::{self, AuditEntry},
    error::{AppError, AppResult, OptionExt},
    middleware::ip::extract_ip_from_headers,
    middleware::AuthUser,
    state::AppState,
    types::*,
};

use super::auth::{agent, user_dto, UserRow};
use super::pharmacies::{pharmacy_dto, PharmacyRow, PHARMACY_COLS};

pub async fn dashboard(State(state): State<AppState>, user: AuthUser) -> AppResult<impl IntoResponse> {
    user.require_role(UserRole::Admin)?;

    let (users_total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users").fetch_one(&state.db).await?;
    let (customers,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'customer'")
        .fetch_one(&state.db)
        .await?;
    let (sellers,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'seller'")
        .fetch_one(&state.db)
        .await?;
    let (pharmacies_total,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM pharmacies").fetch_one(&state.db).await?;
    let (pharmacies_pending,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM pharmacies WHERE verification_status = 'pending'")
            .fetch_one(&state.db)
            .await?;
    let (products_total,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM products").fetch_one(&state.db).await?;
    let (orders_total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders").fetch_one(&state.db).await?;
    let (orders_pending,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM orders WHERE status = 'pending'")
            .fetch_one(&state.db)
            .await?;

    // Recent order volume and delivered revenue; timestamps are
    // lexicographically comparable
    let week_cutoff = fmt_ts(Utc::now() - Duration::days(7));
    let month_cutoff = fmt_ts(Utc::now() - Duration::days(30));
    let (orders_week,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM orders WHERE created_at >= ?1")
            .bind(&week_cutoff)
            .fetch_one(&state.db)
            .await?;
    let (orders_month,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM orders WHERE created_at >= ?1")
            .bind(&month_cutoff)
            .fetch_one(&state.db)
            .await?;
    let (revenue_week,): (f64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(total), 0) FROM orders WHERE status = 'delivered' AND created_at >= ?1",
    )
    .bind(&week_cutoff)
    .fetch_one(&state.db)
    .await?;
    let (revenue_month,): (f64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(total), 0) FROM orders WHERE status = 'delivered' AND created_at >= ?1",
    )
    .bind(&month_cutoff)
    .fetch_one(&state.db)
    .await?;

    let recent: Vec<AuditRow> = sqlx::query_as(&format!(
        "SELECT {} FROM audit_log ORDER BY created_at DESC LIMIT 10",
        AUDIT_COLS
    ))
    .fetch_all(&state.db)
    .await?;
    let recent_activity: Vec<AuditEntryDto> = recent.iter().map(audit_dto).collect::<AppResult<_>>()?;

    Ok(Json(json!({
        "users": { "total": users_total, "customers": customers, "sellers": sellers },
        "pharmacies": { "total": pharmacies_total, "pending_verification": pharmacies_pending },
        "products": { "total": products_total },
        "orders": {
            "total": orders_total,
            "pending": orders_pending,
            "last_7_days": orders_week,
            "last_30_days": orders_month,
        },
        "revenue": { "last_7_days": revenue_week, "last_30_days": revenue_month },
        "recent_activity": recent_activity,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<String>,
    pub active: Option<bool>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<ListUsersQuery>,
) -> AppResult<impl IntoResponse> {
    user.require_role(UserRole::Admin)?;

    let role = match &q.role {
        Some(r) => Some(
            UserRole::parse(r).ok_or_else(|| AppError::InvalidInput(format!("Unknown role: {}", r)))?,
        ),
        None => None,
    };
    let paging = Pagination { page: q.page, per_page: q.per_page };
    let (page, per_page) = paging.clamp();

    let mut qb = sqlx::QueryBuilder::new(
        "SELECT id, email, phone, password_hash, full_name, role, is_active, email_verified, created_at, last_login_at FROM users WHERE 1=1",
    );
    let mut count_qb = sqlx::QueryBuilder::new("SELECT COUNT(*) AS cnt FROM users WHERE 1=1");
    for builder in [&mut qb, &mut count_qb] {
        if let Some(role) = role {
            builder.push(" AND role = ").push_bind(role.as_str());
        }
        if let Some(active) = q.active {
            builder.push(" AND is_active = ").push_bind(active as i64);
        }
        if let Some(search) = &q.search {
            let pattern = format!("%{}%", search.trim());
            builder
                .push(" AND (email LIKE ")
                .push_bind(pattern.clone())
                .push(" COLLATE NOCASE OR full_name LIKE ")
                .push_bind(pattern)
                .push(" COLLATE NOCASE)");
        }
    }
    let total: i64 = {
        use sqlx::Row;
        count_qb.build().fetch_one(&state.db).await?.try_get("cnt")?
    };
    qb.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(per_page)
        .push(" OFFSET ")
        .push_bind(paging.offset());
    let rows: Vec<UserRow> = qb.build_query_as().fetch_all(&state.db).await?;
    let items: Vec<UserDto> = rows.iter().map(user_dto).collect::<AppResult<_>>()?;

    Ok(Json(json!({ "items": items, "page_info": PageInfo::new(page, per_page, total) })))
}

pub async fn update_user_status(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Path(target_id): Path<Uuid>,
    Json(req): Json<UpdateUserStatusRequest>,
) -> AppResult<impl IntoResponse> {
    user.require_role(UserRole::Admin)?;

    let target = super::auth::fetch_user(&state.db, target_id).await?;
    if target.role == UserRole::Admin.as_str() && !req.is_active {
        return Err(AppError::BadRequest("Admin accounts cannot be deactivated".to_string()));
    }

    sqlx::query("UPDATE users SET is_active = ?1 WHERE id = ?2")
        .bind(req.is_active as i64)
        .bind(target_id.to_string())
        .execute(&state.db)
        .await?;

    let ip = extract_ip_from_headers(&headers, None);
    audit::record(
        &state.db,
        AuditEntry::new("admin.user_status")
            .user(user.id)
            .target("user", target_id)
            .old_value(json!(target.is_active != 0))
            .new_value(json!(req.is_active))
            .client(Some(ip.to_string()), agent(&headers)),
    );

    Ok(Json(json!({ "id": target_id, "is_active": req.is_active })))
}

pub async fn pending_pharmacies(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<impl IntoResponse> {
    user.require_role(UserRole::Admin)?;
    let rows: Vec<PharmacyRow> = sqlx::query_as(&format!(
        "SELECT {} FROM pharmacies WHERE verification_status = 'pending' ORDER BY created_at",
        PHARMACY_COLS
    ))
    .fetch_all(&state.db)
    .await?;
    let items: Vec<PharmacyDto> = rows.iter().map(pharmacy_dto).collect::<AppResult<_>>()?;
    Ok(Json(json!({ "items": items })))
}

pub async fn verify_pharmacy(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Path(pharmacy_id): Path<Uuid>,
    Json(req): Json<VerifyPharmacyRequest>,
) -> AppResult<impl IntoResponse> {
    user.require_role(UserRole::Admin)?;

    let current: Option<(String,)> =
        sqlx::query_as("SELECT verification_status FROM pharmacies WHERE id = ?1")
            .bind(pharmacy_id.to_string())
            .fetch_optional(&state.db)
            .await?;
    let (current,) = current.ok_or_not_found("Pharmacy")?;
    if current != VerificationStatus::Pending.as_str() {
        return Err(AppError::Conflict(format!("Pharmacy is already {}", current)));
    }

    let next = if req.approve { VerificationStatus::Verified } else { VerificationStatus::Rejected };
    sqlx::query(
        "UPDATE pharmacies SET verification_status = ?1, verification_notes = ?2, verified_at = ?3 WHERE id = ?4",
    )
    .bind(next.as_str())
    .bind(&req.notes)
    .bind(req.approve.then(|| fmt_ts(Utc::now())))
    .bind(pharmacy_id.to_string())
    .execute(&state.db)
    .await?;

    let ip = extract_ip_from_headers(&headers, None);
    audit::record(
        &state.db,
        AuditEntry::new("admin.pharmacy_verify")
            .user(user.id)
            .target("pharmacy", pharmacy_id)
            .describe(req.notes.clone().unwrap_or_default())
            .old_value(json!(current))
            .new_value(json!(next.as_str()))
            .client(Some(ip.to_string()), agent(&headers)),
    );

    Ok(Json(json!({ "id": pharmacy_id, "verification_status": next.as_str() })))
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    user_id: Option<String>,
    action: String,
    target_type: Option<String>,
    target_id: Option<String>,
    description: Option<String>,
    old_value: Option<String>,
    new_value: Option<String>,
    ip: Option<String>,
    user_agent: Option<String>,
    created_at: String,
}

const AUDIT_COLS: &str =
    "id, user_id, action, target_type, target_id, description, old_value, new_value, ip, user_agent, created_at";

fn audit_dto(row: &AuditRow) -> AppResult<AuditEntryDto> {
    let id = Uuid::parse_str(&row.id)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt audit id: {}", e)))?;
    let user_id = match &row.user_id {
        Some(uid) => Some(
            Uuid::parse_str(uid)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt audit user id: {}", e)))?,
        ),
        None => None,
    };
    let parse_value = |v: &Option<String>| {
        v.as_deref().map(|s| serde_json::from_str(s).unwrap_or_else(|_| json!(s)))
    };
    Ok(AuditEntryDto {
        id,
        user_id,
        action: row.action.clone(),
        target_type: row.target_type.clone(),
        target_id: row.target_id.clone(),
        description: row.description.clone(),
        old_value: parse_value(&row.old_value),
        new_value: parse_value(&row.new_value),
        ip: row.ip.clone(),
        user_agent: row.user_agent.clone(),
        created_at: row.created_at.clone(),
    })
}

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub action: Option<String>,
    pub user_id: Option<Uuid>,
    pub target_type: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

pub async fn audit_log(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<AuditLogQuery>,
) -> AppResult<impl IntoResponse> {
    user.require_role(UserRole::Admin)?;
    let paging = Pagination { page: q.page, per_page: q.per_page };
    let (page, per_page) = paging.clamp();

    let mut qb = sqlx::QueryBuilder::new(format!("SELECT {} FROM audit_log WHERE 1=1", AUDIT_COLS));
    let mut count_qb = sqlx::QueryBuilder::new("SELECT COUNT(*) AS cnt FROM audit_log WHERE 1=1");
    for builder in [&mut qb, &mut count_qb] {
        if let Some(action) = &q.action {
            builder.push(" AND action = ").push_bind(action.clone());
        }
        if let Some(user_id) = q.user_id {
            builder.push(" AND user_id = ").push_bind(user_id.to_string());
        }
        if let Some(target_type) = &q.target_type {
            builder.push(" AND target_type = ").push_bind(target_type.clone());
        }
    }
    let total: i64 = {
        use sqlx::Row;
        count_qb.build().fetch_one(&state.db).await?.try_get("cnt")?
    };
    qb.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(per_page)
        .push(" OFFSET ")
        .push_bind(paging.offset());
    let rows: Vec<AuditRow> = qb.build_query_as().fetch_all(&state.db).await?;
    let items: Vec<AuditEntryDto> = rows.iter().map(audit_dto).collect::<AppResult<_>>()?;

    Ok(Json(json!({ "items": items, "page_info": PageInfo::new(page, per_page, total) })))
}

#[derive(sqlx::FromRow)]
struct SettingRow {
    key: String,
    value: String,
    value_type: String,
    description: Option<String>,
    updated_at: String,
}

fn setting_dto(row: &SettingRow) -> SettingDto {
    let value = match SettingType::parse(&row.value_type) {
        Some(SettingType::String) | None => json!(row.value),
        Some(_) => serde_json::from_str(&row.value).unwrap_or_else(|_| json!(row.value)),
    };
    SettingDto {
        key: row.key.clone(),
        value,
        value_type: row.value_type.clone(),
        description: row.description.clone(),
        updated_at: row.updated_at.clone(),
    }
}

/// Checks the JSON value against the declared type and returns the TEXT form
/// that goes into the settings table.
fn encode_setting_value(value: &serde_json::Value, value_type: SettingType) -> AppResult<String> {
    match value_type {
        SettingType::String => value
            .as_str()
            .map(String::from)
            .ok_or_else(|| AppError::ValidationError {
                field: "value".to_string(),
                message: "Expected a string value".to_string(),
            }),
        SettingType::Integer => {
            if value.is_i64() || value.is_u64() {
                Ok(value.to_string())
            } else {
                Err(AppError::ValidationError {
                    field: "value".to_string(),
                    message: "Expected an integer value".to_string(),
                })
            }
        }
        SettingType::Boolean => {
            if value.is_boolean() {
                Ok(value.to_string())
            } else {
                Err(AppError::ValidationError {
                    field: "value".to_string(),
                    message: "Expected a boolean value".to_string(),
                })
            }
        }
        SettingType::Json => serde_json::to_string(value).map_err(|e| AppError::Internal(e.into())),
    }
}

pub async fn list_settings(State(state): State<AppState>, user: AuthUser) -> AppResult<impl IntoResponse> {
    user.require_role(UserRole::Admin)?;
    let rows: Vec<SettingRow> = sqlx::query_as(
        "SELECT key, value, value_type, description, updated_at FROM settings ORDER BY key",
    )
    .fetch_all(&state.db)
    .await?;
    let items: Vec<SettingDto> = rows.iter().map(setting_dto).collect();
    Ok(Json(json!({ "items": items })))
}

pub async fn update_setting(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Path(key): Path<String>,
    Json(req): Json<UpdateSettingRequest>,
) -> AppResult<impl IntoResponse> {
    user.require_role(UserRole::Admin)?;

    let key = key.trim().to_lowercase();
    if key.is_empty() || key.len() > 100 || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return Err(AppError::ValidationError {
            field: "key".to_string(),
            message: "Setting keys are lowercase alphanumerics, '_' and '.'".to_string(),
        });
    }

    let existing: Option<SettingRow> = sqlx::query_as(
        "SELECT key, value, value_type, description, updated_at FROM settings WHERE key = ?1",
    )
    .bind(&key)
    .fetch_optional(&state.db)
    .await?;

    let value_type = match &req.value_type {
        Some(t) => SettingType::parse(t)
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown value type: {}", t)))?,
        None => existing
            .as_ref()
            .and_then(|row| SettingType::parse(&row.value_type))
            .unwrap_or(SettingType::String),
    };
    let encoded = encode_setting_value(&req.value, value_type)?;

    sqlx::query(
        r#"INSERT INTO settings (key, value, value_type, description, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               value_type = excluded.value_type,
               description = COALESCE(excluded.description, settings.description),
               updated_at = excluded.updated_at"#,
    )
    .bind(&key)
    .bind(&encoded)
    .bind(value_type.as_str())
    .bind(&req.description)
    .bind(fmt_ts(Utc::now()))
    .execute(&state.db)
    .await?;

    let ip = extract_ip_from_headers(&headers, None);
    let mut entry = AuditEntry::new("admin.setting_update")
        .user(user.id)
        .target("setting", &key)
        .new_value(req.value.clone())
        .client(Some(ip.to_string()), agent(&headers));
    if let Some(old) = &existing {
        entry = entry.old_value(setting_dto(old).value);
    }
    audit::record(&state.db, entry);

    let row: SettingRow = sqlx::query_as(
        "SELECT key, value, value_type, description, updated_at FROM settings WHERE key = ?1",
    )
    .bind(&key)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(setting_dto(&row)))
}

pub async fn list_districts(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let rows: Vec<(i64, String, Option<String>)> =
        sqlx::query_as("SELECT id, name, name_ar FROM districts ORDER BY name")
            .fetch_all(&state.db)
            .await?;
    let items: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(id, name, name_ar)| json!({ "id": id, "name": name, "name_ar": name_ar }))
        .collect();
    Ok(Json(json!({ "items": items })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_setting_value_typed() {
        assert_eq!(encode_setting_value(&json!("hi"), SettingType::String).unwrap(), "hi");
        assert_eq!(encode_setting_value(&json!(42), SettingType::Integer).unwrap(), "42");
        assert_eq!(encode_setting_value(&json!(true), SettingType::Boolean).unwrap(), "true");
        assert_eq!(
            encode_setting_value(&json!({"a": 1}), SettingType::Json).unwrap(),
            "{\"a\":1}"
        );
    }

    #[test]
    fn test_encode_setting_value_mismatch() {
        assert!(encode_setting_value(&json!(42), SettingType::String).is_err());
        assert!(encode_setting_value(&json!("42"), SettingType::Integer).is_err());
        assert!(encode_setting_value(&json!(1), SettingType::Boolean).is_err());
    }

    #[test]
    fn test_setting_dto_parses_typed_values() {
        let row = SettingRow {
            key: "orders.max_per_day".to_string(),
            value: "25".to_string(),
            value_type: "integer".to_string(),
            description: None,
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        };
        assert_eq!(setting_dto(&row).value, json!(25));
    }
}
