use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::CookieJar;
use tracing::warn;

use super::{claims::SessionClaims, cookies::SESSION_COOKIE_NAME};
use crate::{error::AppError, state::AppState, users::repo_types::Role};

/// Verified claims of the caller's `session` cookie.
#[derive(Debug, Clone)]
pub struct AuthSession(pub SessionClaims);

impl AuthSession {
    pub fn user_id(&self) -> &str {
        &self.0.identity.user_id
    }

    pub fn role(&self) -> Role {
        self.0.identity.role
    }

    /// Admins and moderators.
    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.role().is_staff() {
            Ok(())
        } else {
            warn!(user_id = self.user_id(), role = %self.role(), "staff role required");
            Err(AppError::unauthorized())
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role() == Role::Admin {
            Ok(())
        } else {
            warn!(user_id = self.user_id(), role = %self.role(), "admin role required");
            Err(AppError::unauthorized())
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar
            .get(SESSION_COOKIE_NAME)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(AppError::unauthorized)?;

        match state.tokens.verify_session(&token) {
            Some(claims) => Ok(AuthSession(claims)),
            None => {
                warn!("invalid or expired session");
                Err(AppError::unauthorized())
            }
        }
    }
}
