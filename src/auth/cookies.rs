use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

pub const SESSION_COOKIE_NAME: &str = "session";

/// Session cookie: `SameSite=Strict`, path `/`, `Max-Age` equal to the token
/// lifetime.
pub fn session_cookie(token: &str, max_age: Duration, http_only: bool, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, token.to_string()))
        .http_only(http_only)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(max_age)
        .build()
}

pub fn clear_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, ""))
        .http_only(true)
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}
