use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{post, put},
    Router,
};
use tracing::{instrument, warn};

use super::{
    dto::{ListQuery, ProcessRequestBody, SubmitAccessRequest},
    services::{self, Verdict},
};
use crate::{
    auth::extractors::AuthSession,
    error::{AppError, AppJson, AppResult},
    response::ApiResponse,
    state::AppState,
};

pub fn request_routes() -> Router<AppState> {
    Router::new()
        .route("/access-requests", post(submit).get(list))
        .route("/access-requests/:id/approve", put(approve))
        .route("/access-requests/:id/reject", put(reject))
}

#[instrument(skip_all)]
pub async fn submit(
    State(state): State<AppState>,
    AppJson(payload): AppJson<SubmitAccessRequest>,
) -> AppResult<impl IntoResponse> {
    let new = payload.validate().map_err(AppError::Validation)?;
    let request = services::submit(&state, new).await?;
    Ok(ApiResponse::with_message(
        "Access request submitted successfully",
        request,
    ))
}

#[instrument(skip(state, session))]
pub async fn list(
    State(state): State<AppState>,
    session: AuthSession,
    Query(query): Query<ListQuery>,
) -> AppResult<impl IntoResponse> {
    session.require_staff()?;
    let (status, limit) = query.parse().map_err(AppError::Validation)?;
    let requests = services::list(&state, status, limit).await?;
    Ok(ApiResponse::data(requests))
}

#[instrument(skip(state, session, body), fields(actor = session.user_id()))]
pub async fn approve(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    process(state, session, id, body, Verdict::Approve, "Access request approved").await
}

#[instrument(skip(state, session, body), fields(actor = session.user_id()))]
pub async fn reject(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    process(state, session, id, body, Verdict::Reject, "Access request rejected").await
}

async fn process(
    state: AppState,
    session: AuthSession,
    id: String,
    body: Bytes,
    verdict: Verdict,
    message: &'static str,
) -> AppResult<impl IntoResponse> {
    session.require_staff()?;
    let notes = notes_from(&body)?;
    let outcome = services::process(&state, &id, verdict, notes, session.user_id()).await?;
    Ok(ApiResponse::with_message(message, outcome))
}

/// The body is optional, but one that is sent must be a valid JSON object.
fn notes_from(body: &[u8]) -> AppResult<Option<String>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let payload: ProcessRequestBody = serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "rejected json body");
        AppError::BadRequest(format!("Invalid request body: {e}"))
    })?;
    Ok(payload.notes)
}
