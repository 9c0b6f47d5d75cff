use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::CookieJar;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::{
    cookies::{clear_session_cookie, session_cookie},
    dto::{HandshakeBody, HandshakeQuery, LoginRequest, LoginResponse, ResetPasswordRequest, SessionView},
    extractors::AuthSession,
    middleware::LOGIN_PATH,
    services,
};
use crate::{
    error::{AppJson, AppResult},
    response::ApiResponse,
    state::AppState,
};

const DASHBOARD_PATH: &str = "/admin/dashboard";
const HANDSHAKE_FAILED_PATH: &str = "/admin/login?error=handshake";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/handshake", get(handshake_link).post(handshake_exchange))
        .route("/auth/logout", post(logout))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/me", get(me))
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let handshake_token = services::login(&state, payload).await?;
    Ok(Json(LoginResponse {
        success: true,
        message: "Login successful",
        handshake_token,
    }))
}

/// Link-based exchange; every outcome is a redirect.
#[instrument(skip_all)]
pub async fn handshake_link(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<HandshakeQuery>,
) -> (CookieJar, Redirect) {
    match services::exchange_handshake(&state, &query.token).await {
        Ok(issued) => {
            info!(user_id = %issued.claims.identity.user_id, "session opened via link");
            let cookie = session_cookie(&issued.token, issued.max_age, true, state.config.production);
            (jar.add(cookie), Redirect::to(DASHBOARD_PATH))
        }
        Err(e) => {
            warn!(error = %e, "handshake link rejected");
            (jar, Redirect::to(HANDSHAKE_FAILED_PATH))
        }
    }
}

#[instrument(skip_all)]
pub async fn handshake_exchange(
    State(state): State<AppState>,
    jar: CookieJar,
    AppJson(body): AppJson<HandshakeBody>,
) -> AppResult<impl IntoResponse> {
    let issued = services::exchange_handshake(&state, &body.token).await?;
    info!(user_id = %issued.claims.identity.user_id, "session opened");
    let production = state.config.production;
    let cookie = session_cookie(&issued.token, issued.max_age, production, production);
    Ok((jar.add(cookie), ApiResponse::<()>::message("Session created")))
}

#[instrument(skip_all)]
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Redirect) {
    state.events.write("auth.logout", json!({})).await;
    (jar.add(clear_session_cookie()), Redirect::to(LOGIN_PATH))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ResetPasswordRequest>,
) -> AppResult<impl IntoResponse> {
    services::issue_reset_token(&state, &payload.email).await?;
    Ok(ApiResponse::<()>::message(
        "If the email exists, password reset instructions have been sent",
    ))
}

#[instrument(skip_all)]
pub async fn me(session: AuthSession) -> AppResult<impl IntoResponse> {
    Ok(ApiResponse::data(SessionView::from(session.0)))
}
