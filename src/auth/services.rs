use std::time::Instant;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use time::{Duration, OffsetDateTime};
use tracing::warn;

use super::{
    claims::{Identity, SessionClaims},
    dto::LoginRequest,
    password::{generate_reset_token, verify_password, verify_without_account},
};
use crate::{
    error::{AppError, AppResult, FieldError},
    state::AppState,
    users::repo_types::UserStatus,
};

const RESET_TOKEN_TTL: Duration = Duration::hours(24);

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Checks credentials and returns a fresh handshake token.
pub async fn login(state: &AppState, req: LoginRequest) -> AppResult<String> {
    let started = Instant::now();
    let result = attempt_login(state, req, started).await;
    if let Err(AppError::Internal(e)) = &result {
        state
            .events
            .write(
                "auth.login.error",
                json!({ "error": e.to_string(), "ms": elapsed_ms(started) }),
            )
            .await;
    }
    result
}

async fn attempt_login(state: &AppState, req: LoginRequest, started: Instant) -> AppResult<String> {
    let email = normalize_email(&req.email);
    state
        .events
        .write(
            "auth.login.request",
            json!({ "email": email, "rememberMe": req.remember_me }),
        )
        .await;

    let mut errors = Vec::new();
    if !is_valid_email(&email) {
        errors.push(FieldError::new("email", "must be a valid email address"));
    }
    if req.password.is_empty() {
        errors.push(FieldError::new("password", "is required"));
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let Some(user) = state.store.find_user_by_email(&email).await? else {
        verify_without_account(&req.password).await;
        warn!(%email, "login unknown email");
        state
            .events
            .write(
                "auth.login.invalid_email",
                json!({ "email": email, "ms": elapsed_ms(started) }),
            )
            .await;
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    };

    if !verify_password(&req.password, &user.password_hash).await? {
        warn!(%email, user_id = %user.id, "login invalid password");
        state
            .events
            .write(
                "auth.login.invalid_password",
                json!({ "email": email, "ms": elapsed_ms(started) }),
            )
            .await;
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    }

    if user.status != UserStatus::Active {
        warn!(%email, status = %user.status, "login on inactive account");
        state
            .events
            .write(
                "auth.login.inactive",
                json!({ "email": email, "status": user.status, "ms": elapsed_ms(started) }),
            )
            .await;
        return Err(AppError::Unauthorized("Account is suspended or inactive".into()));
    }

    state
        .store
        .record_login(&user.id, OffsetDateTime::now_utc())
        .await?;

    let identity = Identity {
        user_id: user.id.clone(),
        email: user.email.clone(),
        role: user.role,
    };
    let token = state.tokens.create_handshake_token(
        &identity,
        req.remember_me,
        state.tokens.handshake_ttl(),
    )?;

    state
        .events
        .write(
            "auth.login.handshake_issued",
            json!({
                "email": email,
                "userId": user.id,
                "role": user.role,
                "ms": elapsed_ms(started),
            }),
        )
        .await;
    Ok(token)
}

pub struct IssuedSession {
    pub token: String,
    pub claims: SessionClaims,
    pub max_age: Duration,
}

/// Trades a live handshake token for a session token. An invalid or expired
/// handshake is a `BadRequest`.
pub async fn exchange_handshake(state: &AppState, handshake: &str) -> AppResult<IssuedSession> {
    let started = Instant::now();
    let Some(claims) = state.tokens.verify_handshake(handshake) else {
        state
            .events
            .write("auth.handshake.invalid", json!({ "reason": "invalid_token" }))
            .await;
        return Err(AppError::BadRequest("Invalid token".into()));
    };

    let (token, session) = match state
        .tokens
        .create_session_token(&claims.identity, claims.remember_me)
    {
        Ok(issued) => issued,
        Err(e) => {
            state
                .events
                .write("auth.handshake.error", json!({ "error": e.to_string() }))
                .await;
            return Err(AppError::Internal(e));
        }
    };

    state
        .events
        .write(
            "auth.handshake.success",
            json!({
                "userId": session.identity.user_id,
                "role": session.identity.role,
                "ms": elapsed_ms(started),
            }),
        )
        .await;

    Ok(IssuedSession {
        token,
        max_age: state.tokens.session_ttl_for(session.remember_me),
        claims: session,
    })
}

/// Stores a reset token on the account if it exists. Callers answer the
/// same way either way.
pub async fn issue_reset_token(state: &AppState, email: &str) -> AppResult<()> {
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(AppError::Validation(vec![FieldError::new(
            "email",
            "must be a valid email address",
        )]));
    }
    let Some(user) = state.store.find_user_by_email(&email).await? else {
        return Ok(());
    };
    let token = generate_reset_token();
    let expires_at = OffsetDateTime::now_utc() + RESET_TOKEN_TTL;
    state.store.set_reset_token(&user.id, &token, expires_at).await?;
    state
        .events
        .write("auth.reset_password.issued", json!({ "userId": user.id }))
        .await;
    Ok(())
}
