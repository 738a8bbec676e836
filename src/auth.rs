//! Password hashing and JWT handling.
//!
//! Passwords are stored as Argon2id PHC strings. Access and refresh tokens
//! are HS256 JWTs signed with the configured secret; the `typ` claim keeps
//! the two kinds apart so a refresh token can never authorize a request.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{AppError, AppResult};
use crate::types::UserRole;

pub const TOKEN_TYPE_ACCESS: &str = "access";
pub const TOKEN_TYPE_REFRESH: &str = "refresh";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub role: String,
    /// `access` or `refresh`.
    pub typ: String,
    pub exp: i64,
    pub iat: i64,
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, stored_hash: &str) -> AppResult<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("stored password hash is invalid: {}", e)))?;
    Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
}

pub fn issue_access_token(cfg: &AuthConfig, user_id: Uuid, role: UserRole) -> AppResult<String> {
    issue_token(cfg, user_id, role, TOKEN_TYPE_ACCESS, Duration::minutes(cfg.access_token_minutes))
}

pub fn issue_refresh_token(cfg: &AuthConfig, user_id: Uuid, role: UserRole) -> AppResult<String> {
    issue_token(cfg, user_id, role, TOKEN_TYPE_REFRESH, Duration::days(cfg.refresh_token_days))
}

fn issue_token(
    cfg: &AuthConfig,
    user_id: Uuid,
    role: UserRole,
    typ: &str,
    validity: Duration,
) -> AppResult<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id,
        role: role.as_str().to_string(),
        typ: typ.to_string(),
        exp: (now + validity).timestamp(),
        iat: now.timestamp(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(cfg.jwt_secret.as_bytes()))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to sign token: {}", e)))
}

/// Decodes and validates a JWT, checking signature, expiry and token type.
pub fn decode_token(cfg: &AuthConfig, token: &str, expected_typ: &str) -> AppResult<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(cfg.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Unauthorized(format!("invalid token: {}", e)))?;

    if data.claims.typ != expected_typ {
        return Err(AppError::Unauthorized("wrong token type".to_string()));
    }
    Ok(data.claims)
}

/// Random URL-safe token for email verification and password reset links.
pub fn generate_opaque_token() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(48).map(char::from).collect()
}

/// Order numbers: `ORD-YYYYMMDD-` plus a 6-char uppercase suffix.
pub fn generate_order_number() -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", date, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> AuthConfig {
        AuthConfig {
            jwt_secret: "0123456789abcdef0123456789abcdef".to_string(),
            access_token_minutes: 15,
            refresh_token_days: 7,
            token_expiry_hours: 24,
        }
    }

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("Sup3rSecret").unwrap();
        assert!(verify_password("Sup3rSecret", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn test_access_token_roundtrip() {
        let cfg = test_cfg();
        let id = Uuid::new_v4();
        let token = issue_access_token(&cfg, id, UserRole::Customer).unwrap();
        let claims = decode_token(&cfg, &token, TOKEN_TYPE_ACCESS).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.role, "customer");
    }

    #[test]
    fn test_refresh_token_rejected_as_access() {
        let cfg = test_cfg();
        let token = issue_refresh_token(&cfg, Uuid::new_v4(), UserRole::Seller).unwrap();
        assert!(decode_token(&cfg, &token, TOKEN_TYPE_ACCESS).is_err());
    }

    #[test]
    fn test_order_number_shape() {
        let n = generate_order_number();
        assert!(n.starts_with("ORD-"));
        let parts: Vec<&str> = n.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
