use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use std::convert::Infallible;
use uuid::Uuid;

use crate::auth::{self, TOKEN_TYPE_ACCESS};
use crate::error::AppError;
use crate::state::AppState;
use crate::types::UserRole;

/// The authenticated caller, extracted from the `Authorization: Bearer`
/// header. Rejects with 401 when the header is missing or the token is
/// invalid or expired.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: UserRole,
}

impl AuthUser {
    pub fn require_role(&self, role: UserRole) -> Result<(), AppError> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("{} role required", role.as_str())))
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header_val = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing Authorization header".to_string()))?;

        let token = header_val
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("expected Bearer token".to_string()))?;

        let claims = auth::decode_token(&state.config.auth, token, TOKEN_TYPE_ACCESS)?;
        let role = UserRole::parse(&claims.role)
            .ok_or_else(|| AppError::Unauthorized("unknown role in token".to_string()))?;

        Ok(AuthUser { id: claims.sub, role })
    }
}

/// Like [`AuthUser`] but never rejects. Public endpoints that show more to
/// owners or admins use this to look at credentials when they are present.
#[derive(Debug, Clone, Default)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(MaybeAuthUser(AuthUser::from_request_parts(parts, state).await.ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_role() {
        let user = AuthUser { id: Uuid::new_v4(), role: UserRole::Seller };
        assert!(user.require_role(UserRole::Seller).is_ok());
        assert!(user.require_role(UserRole::Admin).is_err());
        assert!(!user.is_admin());
    }
}
