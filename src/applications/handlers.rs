use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::json;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use super::dto::{CreateApplicationRequest, ListApplicationsQuery, UpdateApplicationRequest};
use crate::{
    auth::extractors::AuthSession,
    error::{AppError, AppJson, AppResult},
    response::ApiResponse,
    state::AppState,
    store::StoreError,
    users::dto::DeletedCount,
};

pub fn application_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/applications",
            get(list_applications)
                .post(create_application)
                .delete(delete_all_applications),
        )
        .route(
            "/applications/:id",
            get(get_application)
                .put(update_application)
                .delete(delete_application),
        )
}

fn name_taken(e: StoreError) -> AppError {
    match e {
        StoreError::Conflict(_) => AppError::Conflict("Application with this name already exists".into()),
        other => other.into(),
    }
}

#[instrument(skip(state, session))]
pub async fn list_applications(
    State(state): State<AppState>,
    session: AuthSession,
    Query(query): Query<ListApplicationsQuery>,
) -> AppResult<impl IntoResponse> {
    session.require_staff()?;
    let filter = query.into_filter().map_err(AppError::Validation)?;
    let apps = state.store.list_applications(&filter).await?;

    state
        .events
        .write(
            "applications.list.success",
            json!({
                "userId": session.user_id(),
                "count": apps.len(),
                "filters": { "status": filter.status, "platform": filter.platform },
            }),
        )
        .await;
    Ok(ApiResponse::data(apps))
}

#[instrument(skip(state, session))]
pub async fn get_application(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    session.require_staff()?;
    let app = state
        .store
        .find_application(&id)
        .await?
        .ok_or(AppError::NotFound("Application"))?;
    Ok(ApiResponse::data(app))
}

#[instrument(skip_all)]
pub async fn create_application(
    State(state): State<AppState>,
    session: AuthSession,
    AppJson(payload): AppJson<CreateApplicationRequest>,
) -> AppResult<impl IntoResponse> {
    session.require_admin()?;
    let app = payload
        .into_application(OffsetDateTime::now_utc())
        .map_err(AppError::Validation)?;

    if state.store.find_application_by_name(&app.name).await?.is_some() {
        return Err(AppError::Conflict("Application with this name already exists".into()));
    }
    state.store.insert_application(&app).await.map_err(name_taken)?;

    info!(application_id = %app.id, name = %app.name, "application created");
    state
        .events
        .write(
            "applications.create.success",
            json!({
                "userId": session.user_id(),
                "applicationId": app.id,
                "name": app.name,
                "platform": app.platform,
            }),
        )
        .await;
    Ok(ApiResponse::with_message("Application created successfully", app))
}

#[instrument(skip(state, session, payload))]
pub async fn update_application(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<String>,
    AppJson(payload): AppJson<UpdateApplicationRequest>,
) -> AppResult<impl IntoResponse> {
    session.require_admin()?;
    let now = OffsetDateTime::now_utc();
    let patch = payload.into_patch(now).map_err(AppError::Validation)?;
    let fields = patch.field_names();
    if fields.is_empty() {
        return Err(AppError::BadRequest("No fields to update".into()));
    }

    let app = state
        .store
        .update_application(&id, patch, now)
        .await
        .map_err(name_taken)?;

    info!(application_id = %app.id, ?fields, "application updated");
    state
        .events
        .write(
            "applications.update.success",
            json!({ "userId": session.user_id(), "applicationId": app.id, "updates": fields }),
        )
        .await;
    Ok(ApiResponse::with_message("Application updated successfully", app))
}

#[instrument(skip(state, session))]
pub async fn delete_application(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    session.require_admin()?;
    let app = state.store.delete_application(&id).await?;

    info!(application_id = %app.id, "application deleted");
    state
        .events
        .write(
            "applications.delete.success",
            json!({ "userId": session.user_id(), "applicationId": app.id, "name": app.name }),
        )
        .await;
    Ok(ApiResponse::<()>::message("Application deleted successfully"))
}

#[instrument(skip_all)]
pub async fn delete_all_applications(
    State(state): State<AppState>,
    session: AuthSession,
) -> AppResult<impl IntoResponse> {
    session.require_admin()?;
    let deleted_count = state.store.delete_all_applications().await?;

    warn!(deleted_count, actor = session.user_id(), "all applications deleted");
    state
        .events
        .write(
            "applications.delete_all.success",
            json!({ "userId": session.user_id(), "deletedCount": deleted_count }),
        )
        .await;
    let message = if deleted_count == 0 {
        "No applications to delete".to_string()
    } else {
        format!("Successfully deleted {deleted_count} applications")
    };
    Ok(ApiResponse::with_message(message, DeletedCount { deleted_count }))
}
