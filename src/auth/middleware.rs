use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use tracing::debug;

use super::cookies::SESSION_COOKIE_NAME;
use crate::state::AppState;

pub const LOGIN_PATH: &str = "/admin/login";
const PROTECTED_PREFIX: &str = "/admin";

/// True for `/admin` and anything below it, except the login page.
pub fn requires_session(path: &str) -> bool {
    let under_admin = path == PROTECTED_PREFIX
        || path
            .strip_prefix(PROTECTED_PREFIX)
            .is_some_and(|rest| rest.starts_with('/'));
    let is_login = path == LOGIN_PATH || path.strip_prefix(LOGIN_PATH) == Some("/");
    under_admin && !is_login
}

/// Redirects protected admin pages to the login page unless the request
/// carries a session cookie that verifies as a live session token.
pub async fn session_gate(
    State(state): State<AppState>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    if !requires_session(&path) {
        return next.run(request).await;
    }

    let authenticated = jar
        .get(SESSION_COOKIE_NAME)
        .and_then(|c| state.tokens.verify_session(c.value()))
        .is_some();
    if authenticated {
        next.run(request).await
    } else {
        debug!(%path, "no valid session; redirecting to login");
        Redirect::to(LOGIN_PATH).into_response()
    }
}
