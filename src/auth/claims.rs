use serde::{Deserialize, Serialize};

use crate::users::repo_types::Role;

text_enum! {
    /// Purpose of a signed token. A token is only ever accepted for its own kind.
    pub enum TokenKind {
        Handshake => "handshake",
        Session => "session",
    }
}

/// Who a token speaks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub role: Role,
}

/// Short-lived proof of a successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeClaims {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(default)]
    pub remember_me: bool,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub kind: TokenKind,
}

/// Payload of the `session` cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    #[serde(flatten)]
    pub identity: Identity,
    /// Unix milliseconds.
    pub expires_at: i64,
    #[serde(default)]
    pub remember_me: bool,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub kind: TokenKind,
}
