use serde::{Deserialize, Serialize};

use super::claims::SessionClaims;
use crate::users::repo_types::Role;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub message: &'static str,
    pub handshake_token: String,
}

/// `?token=` on the link-based handshake.
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct HandshakeBody {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
}

/// The caller's own session, as returned by `/auth/me`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    pub expires_at: i64,
    pub remember_me: bool,
}

impl From<SessionClaims> for SessionView {
    fn from(claims: SessionClaims) -> Self {
        Self {
            user_id: claims.identity.user_id,
            email: claims.identity.email,
            role: claims.identity.role,
            expires_at: claims.expires_at,
            remember_me: claims.remember_me,
        }
    }
}
