use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit::{self, AuditEntry},
    auth::{self as tokens, TOKEN_TYPE_REFRESH},
    error::{AppError, AppResult},
    mail,
    middleware::ip::extract_ip_from_headers,
    middleware::validation::{
        sanitize_string, validate_coordinates, validate_email, validate_password, validate_phone,
    },
    state::AppState,
    types::*,
};

#[derive(sqlx::FromRow)]
pub(crate) struct UserRow {
    pub id: String,
    pub email: String,
    pub phone: String,
    pub password_hash: String,
    pub full_name: String,
    pub role: String,
    pub is_active: i64,
    pub email_verified: i64,
    pub created_at: String,
    pub last_login_at: Option<String>,
}

pub(crate) fn user_dto(row: &UserRow) -> AppResult<UserDto> {
    let id = Uuid::parse_str(&row.id)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt user id {}: {}", row.id, e)))?;
    Ok(UserDto {
        id,
        email: row.email.clone(),
        full_name: row.full_name.clone(),
        phone: row.phone.clone(),
        role: row.role.clone(),
        is_active: row.is_active != 0,
        email_verified: row.email_verified != 0,
        created_at: row.created_at.clone(),
        last_login_at: row.last_login_at.clone(),
    })
}

pub(crate) async fn fetch_user(db: &sqlx::SqlitePool, id: Uuid) -> AppResult<UserRow> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, email, phone, password_hash, full_name, role, is_active, email_verified, created_at, last_login_at FROM users WHERE id = ?1",
    )
    .bind(id.to_string())
    .fetch_optional(db)
    .await?;
    row.ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Response> {
    let ip = extract_ip_from_headers(&headers, None);
    if let Err((status, body)) = state.rate_limiter.check_endpoint_limit("/api/auth/register", ip).await {
        return Ok((status, body).into_response());
    }

    let email = req.email.trim().to_lowercase();
    validate_email(&email)?;
    validate_phone(&req.phone)?;
    validate_password(&req.password)?;

    let full_name = sanitize_string(&req.full_name, 120);
    if full_name.is_empty() {
        return Err(AppError::ValidationError {
            field: "full_name".to_string(),
            message: "Full name is required".to_string(),
        });
    }

    let role = match req.role.as_deref() {
        None | Some("customer") => UserRole::Customer,
        Some("seller") => UserRole::Seller,
        Some(other) => {
            return Err(AppError::ValidationError {
                field: "role".to_string(),
                message: format!("Role must be customer or seller, got {}", other),
            })
        }
    };

    // Seller registrations must carry pharmacy details, validated up front
    let pharmacy = if role == UserRole::Seller {
        let p = req.pharmacy.as_ref().ok_or_else(|| AppError::ValidationError {
            field: "pharmacy".to_string(),
            message: "Seller registration requires pharmacy details".to_string(),
        })?;
        validate_coordinates(p.latitude, p.longitude)?;
        let name = sanitize_string(&p.name, 120);
        let license = sanitize_string(&p.license_number, 60);
        let address = sanitize_string(&p.address, 250);
        let district = sanitize_string(&p.district, 120);
        if name.is_empty() || license.is_empty() || address.is_empty() || district.is_empty() {
            return Err(AppError::ValidationError {
                field: "pharmacy".to_string(),
                message: "Pharmacy name, license number, address and district are required".to_string(),
            });
        }
        Some((name, license, address, district, p.latitude, p.longitude))
    } else {
        None
    };

    // Uniqueness checks
    let email_taken: Option<(String,)> =
        sqlx::query_as("SELECT id FROM users WHERE email = ?1").bind(&email).fetch_optional(&state.db).await?;
    if email_taken.is_some() {
        return Err(AppError::Conflict("An account with this email already exists".to_string()));
    }
    let phone_taken: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE phone = ?1")
        .bind(req.phone.trim())
        .fetch_optional(&state.db)
        .await?;
    if phone_taken.is_some() {
        return Err(AppError::Conflict("An account with this phone number already exists".to_string()));
    }
    if let Some((_, license, ..)) = &pharmacy {
        let license_taken: Option<(String,)> =
            sqlx::query_as("SELECT id FROM pharmacies WHERE license_number = ?1")
                .bind(license)
                .fetch_optional(&state.db)
                .await?;
        if license_taken.is_some() {
            return Err(AppError::Conflict("A pharmacy with this license number already exists".to_string()));
        }
    }

    let user_id = Uuid::new_v4();
    let password_hash = tokens::hash_password(&req.password)?;
    let verification_token = tokens::generate_opaque_token();
    let verification_expires = fmt_ts(Utc::now() + Duration::hours(state.config.auth.token_expiry_hours));

    let mut tx = state.db.begin().await?;
    sqlx::query(
        r#"INSERT INTO users (id, email, phone, password_hash, full_name, role, verification_token, verification_expires_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
    )
    .bind(user_id.to_string())
    .bind(&email)
    .bind(req.phone.trim())
    .bind(&password_hash)
    .bind(&full_name)
    .bind(role.as_str())
    .bind(&verification_token)
    .bind(&verification_expires)
    .execute(&mut *tx)
    .await?;

    let mut pharmacy_id = None;
    if let Some((name, license, address, district, lat, lng)) = &pharmacy {
        let pid = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO pharmacies
                (id, owner_id, name, license_number, address, district, latitude, longitude, delivery_fee, verification_status)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending')"#,
        )
        .bind(pid.to_string())
        .bind(user_id.to_string())
        .bind(name)
        .bind(license)
        .bind(address)
        .bind(district)
        .bind(lat)
        .bind(lng)
        .bind(state.config.orders.default_delivery_fee)
        .execute(&mut *tx)
        .await?;
        pharmacy_id = Some(pid);
    }
    tx.commit().await?;

    state.metrics.inc_users_registered();
    audit::record(
        &state.db,
        AuditEntry::new("user.register")
            .user(user_id)
            .target("user", user_id)
            .describe(format!("registered as {}", role.as_str()))
            .client(Some(ip.to_string()), agent(&headers)),
    );
    mail::send_in_background(
        state.mailer.clone(),
        state.metrics.clone(),
        state.mailer.verification_message(&email, &full_name, &verification_token),
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Registration successful. Please verify your email address.",
            "user_id": user_id,
            "pharmacy_id": pharmacy_id,
            "requires_verification": true,
        })),
    )
        .into_response())
}

pub async fn verify_email(
    State(state): State<AppState>,
    Json(req): Json<VerifyEmailRequest>,
) -> AppResult<impl IntoResponse> {
    let row: Option<(String, Option<String>)> =
        sqlx::query_as("SELECT id, verification_expires_at FROM users WHERE verification_token = ?1")
            .bind(req.token.trim())
            .fetch_optional(&state.db)
            .await?;

    let (user_id, expires_at) =
        row.ok_or_else(|| AppError::BadRequest("Invalid or expired verification token".to_string()))?;

    let expired = expires_at.as_deref().and_then(parse_ts).map(|t| t < Utc::now()).unwrap_or(true);
    if expired {
        return Err(AppError::BadRequest("Invalid or expired verification token".to_string()));
    }

    sqlx::query(
        "UPDATE users SET email_verified = 1, verification_token = NULL, verification_expires_at = NULL WHERE id = ?1",
    )
    .bind(&user_id)
    .execute(&state.db)
    .await?;

    Ok(Json(json!({ "message": "Email verified successfully" })))
}

pub async fn resend_verification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ForgotPasswordRequest>,
) -> AppResult<Response> {
    let ip = extract_ip_from_headers(&headers, None);
    if let Err((status, body)) =
        state.rate_limiter.check_endpoint_limit("/api/auth/resend-verification", ip).await
    {
        return Ok((status, body).into_response());
    }

    let email = req.email.trim().to_lowercase();
    validate_email(&email)?;

    let row: Option<(String, String, i64, i64)> =
        sqlx::query_as("SELECT id, full_name, is_active, email_verified FROM users WHERE email = ?1")
            .bind(&email)
            .fetch_optional(&state.db)
            .await?;

    // Response never reveals whether the address is registered
    if let Some((user_id, full_name, is_active, email_verified)) = row {
        if email_verified != 0 {
            return Err(AppError::Conflict("This email address is already verified".to_string()));
        }
        if is_active != 0 {
            let token = tokens::generate_opaque_token();
            let expires = fmt_ts(Utc::now() + Duration::hours(state.config.auth.token_expiry_hours));
            sqlx::query(
                "UPDATE users SET verification_token = ?1, verification_expires_at = ?2 WHERE id = ?3",
            )
            .bind(&token)
            .bind(&expires)
            .bind(&user_id)
            .execute(&state.db)
            .await?;
            mail::send_in_background(
                state.mailer.clone(),
                state.metrics.clone(),
                state.mailer.verification_message(&email, &full_name, &token),
            );
        }
    }

    Ok(Json(json!({
        "message": "If the email address is registered and unverified, a new verification link has been sent."
    }))
    .into_response())
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> AppResult<Response> {
    let ip = extract_ip_from_headers(&headers, None);
    if let Err((status, body)) = state.rate_limiter.check_endpoint_limit("/api/auth/login", ip).await {
        return Ok((status, body).into_response());
    }

    let email = req.email.trim().to_lowercase();
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, email, phone, password_hash, full_name, role, is_active, email_verified, created_at, last_login_at FROM users WHERE email = ?1",
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await?;

    let Some(user) = row else {
        state.metrics.inc_logins_failed();
        return Err(AppError::Unauthorized("Invalid email or password".to_string()));
    };

    if !tokens::verify_password(&req.password, &user.password_hash)? {
        state.metrics.inc_logins_failed();
        return Err(AppError::Unauthorized("Invalid email or password".to_string()));
    }

    if user.is_active == 0 {
        state.metrics.inc_logins_failed();
        return Err(AppError::Forbidden("This account has been deactivated".to_string()));
    }

    if user.email_verified == 0 {
        state.metrics.inc_logins_failed();
        // Distinct shape so clients can offer a re-verification flow
        return Ok((
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": {
                    "code": "EMAIL_NOT_VERIFIED",
                    "message": "Email address has not been verified",
                },
                "requires_verification": true,
                "status": 403,
                "timestamp": Utc::now().to_rfc3339(),
            })),
        )
            .into_response());
    }

    let user_id = Uuid::parse_str(&user.id)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt user id: {}", e)))?;
    let role = UserRole::parse(&user.role)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("corrupt role {}", user.role)))?;

    sqlx::query("UPDATE users SET last_login_at = ?1 WHERE id = ?2")
        .bind(fmt_ts(Utc::now()))
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    let pair = TokenPair {
        access_token: tokens::issue_access_token(&state.config.auth, user_id, role)?,
        refresh_token: tokens::issue_refresh_token(&state.config.auth, user_id, role)?,
        token_type: "Bearer",
        expires_in: state.config.auth.access_token_minutes * 60,
    };

    state.metrics.inc_logins_succeeded();
    Ok(Json(json!({ "tokens": pair, "user": user_dto(&user)? })).into_response())
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> AppResult<impl IntoResponse> {
    let claims = tokens::decode_token(&state.config.auth, &req.refresh_token, TOKEN_TYPE_REFRESH)?;

    // The account must still exist and be active
    let user = fetch_user(&state.db, claims.sub).await.map_err(|_| {
        AppError::Unauthorized("Account no longer exists".to_string())
    })?;
    if user.is_active == 0 {
        return Err(AppError::Forbidden("This account has been deactivated".to_string()));
    }
    let role = UserRole::parse(&user.role)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("corrupt role {}", user.role)))?;

    let access_token = tokens::issue_access_token(&state.config.auth, claims.sub, role)?;
    Ok(Json(json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": state.config.auth.access_token_minutes * 60,
    })))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ForgotPasswordRequest>,
) -> AppResult<Response> {
    let ip = extract_ip_from_headers(&headers, None);
    if let Err((status, body)) =
        state.rate_limiter.check_endpoint_limit("/api/auth/forgot-password", ip).await
    {
        return Ok((status, body).into_response());
    }

    let email = req.email.trim().to_lowercase();
    let row: Option<(String, String, i64)> =
        sqlx::query_as("SELECT id, full_name, is_active FROM users WHERE email = ?1")
            .bind(&email)
            .fetch_optional(&state.db)
            .await?;

    // Response never reveals whether the address is registered
    if let Some((user_id, full_name, is_active)) = row {
        if is_active != 0 {
            let token = tokens::generate_opaque_token();
            let expires = fmt_ts(Utc::now() + Duration::hours(state.config.auth.token_expiry_hours));
            sqlx::query("UPDATE users SET reset_token = ?1, reset_expires_at = ?2 WHERE id = ?3")
                .bind(&token)
                .bind(&expires)
                .bind(&user_id)
                .execute(&state.db)
                .await?;
            mail::send_in_background(
                state.mailer.clone(),
                state.metrics.clone(),
                state.mailer.password_reset_message(&email, &full_name, &token),
            );
            if let Ok(uid) = Uuid::parse_str(&user_id) {
                audit::record(
                    &state.db,
                    AuditEntry::new("user.password_reset_request")
                        .user(uid)
                        .target("user", &user_id)
                        .client(Some(ip.to_string()), agent(&headers)),
                );
            }
        }
    }

    Ok(Json(json!({
        "message": "If the email address is registered, a reset link has been sent."
    }))
    .into_response())
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> AppResult<impl IntoResponse> {
    validate_password(&req.new_password)?;

    let row: Option<(String, Option<String>)> =
        sqlx::query_as("SELECT id, reset_expires_at FROM users WHERE reset_token = ?1")
            .bind(req.token.trim())
            .fetch_optional(&state.db)
            .await?;

    let (user_id, expires_at) =
        row.ok_or_else(|| AppError::BadRequest("Invalid or expired reset token".to_string()))?;

    let expired = expires_at.as_deref().and_then(parse_ts).map(|t| t < Utc::now()).unwrap_or(true);
    if expired {
        return Err(AppError::BadRequest("Invalid or expired reset token".to_string()));
    }

    let password_hash = tokens::hash_password(&req.new_password)?;
    sqlx::query(
        "UPDATE users SET password_hash = ?1, reset_token = NULL, reset_expires_at = NULL WHERE id = ?2",
    )
    .bind(&password_hash)
    .bind(&user_id)
    .execute(&state.db)
    .await?;

    if let Ok(uid) = Uuid::parse_str(&user_id) {
        audit::record(
            &state.db,
            AuditEntry::new("user.password_reset").user(uid).target("user", &user_id),
        );
    }

    Ok(Json(json!({ "message": "Password has been reset" })))
}

pub(crate) fn agent(headers: &HeaderMap) -> Option<String> {
    headers.get("user-agent").and_then(|v| v.to_str().ok()).map(|s| s.chars().take(250).collect())
}
