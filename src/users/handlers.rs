use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde_json::json;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use super::{
    dto::{
        CreateAdminRequest, CreateUserRequest, CreatedAdmin, DeletedCount, ListUsersQuery,
        UpdateUserRequest, UserView,
    },
    services,
};
use crate::{
    auth::extractors::AuthSession,
    error::{AppError, AppJson, AppResult},
    response::ApiResponse,
    state::AppState,
};

pub const SETUP_TOKEN_HEADER: &str = "x-setup-token";

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user).delete(delete_all_users))
        .route("/users/create-admin", post(create_admin))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

#[instrument(skip(state, session))]
pub async fn list_users(
    State(state): State<AppState>,
    session: AuthSession,
    Query(query): Query<ListUsersQuery>,
) -> AppResult<impl IntoResponse> {
    session.require_staff()?;
    let filter = query.into_filter().map_err(AppError::Validation)?;
    let users = state.store.list_users(&filter).await?;

    state
        .events
        .write(
            "users.list.success",
            json!({
                "userId": session.user_id(),
                "count": users.len(),
                "filters": { "role": filter.role, "status": filter.status },
            }),
        )
        .await;

    let now = OffsetDateTime::now_utc();
    let views: Vec<UserView> = users.into_iter().map(|u| UserView::new(u, now)).collect();
    Ok(ApiResponse::data(views))
}

#[instrument(skip(state, session))]
pub async fn get_user(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    session.require_staff()?;
    let user = state
        .store
        .find_user(&id)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    Ok(ApiResponse::data(UserView::new(user, OffsetDateTime::now_utc())))
}

#[instrument(skip_all)]
pub async fn create_user(
    State(state): State<AppState>,
    session: AuthSession,
    AppJson(payload): AppJson<CreateUserRequest>,
) -> AppResult<impl IntoResponse> {
    session.require_admin()?;
    let new = payload.validate().map_err(AppError::Validation)?;
    let created = services::create_user(&state, new, session.user_id()).await?;
    Ok(ApiResponse::with_message("User created successfully", created))
}

#[instrument(skip(state, session, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<String>,
    AppJson(payload): AppJson<UpdateUserRequest>,
) -> AppResult<impl IntoResponse> {
    session.require_staff()?;
    let now = OffsetDateTime::now_utc();
    let patch = payload.into_patch(now).map_err(AppError::Validation)?;
    if patch.role.is_some() {
        session.require_admin()?;
    }
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update".into()));
    }

    let fields = patch.field_names();
    let user = state.store.update_user(&id, patch, now).await?;

    info!(user_id = %user.id, ?fields, "user updated");
    state
        .events
        .write(
            "users.update.success",
            json!({ "userId": session.user_id(), "targetUserId": user.id, "updates": fields }),
        )
        .await;
    Ok(ApiResponse::with_message(
        "User updated successfully",
        UserView::new(user, now),
    ))
}

#[instrument(skip(state, session))]
pub async fn delete_user(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    session.require_admin()?;
    let user = state.store.delete_user(&id).await?;

    info!(user_id = %user.id, "user deleted");
    state
        .events
        .write(
            "users.delete.success",
            json!({ "userId": session.user_id(), "deletedUserId": user.id, "email": user.email }),
        )
        .await;
    Ok(ApiResponse::<()>::message("User deleted successfully"))
}

#[instrument(skip_all)]
pub async fn delete_all_users(
    State(state): State<AppState>,
    session: AuthSession,
) -> AppResult<impl IntoResponse> {
    session.require_admin()?;
    let deleted_count = state.store.delete_all_users().await?;

    warn!(deleted_count, actor = session.user_id(), "all users deleted");
    state
        .events
        .write(
            "users.delete_all.success",
            json!({ "userId": session.user_id(), "deletedCount": deleted_count }),
        )
        .await;
    let message = if deleted_count == 0 {
        "No users to delete".to_string()
    } else {
        format!("Successfully deleted {deleted_count} users")
    };
    Ok(ApiResponse::with_message(message, DeletedCount { deleted_count }))
}

#[instrument(skip_all)]
pub async fn create_admin(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(payload): AppJson<CreateAdminRequest>,
) -> AppResult<impl IntoResponse> {
    let presented = headers
        .get(SETUP_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let authorized = state
        .config
        .admin_setup_token
        .as_deref()
        .is_some_and(|expected| !presented.is_empty() && presented == expected);
    if !authorized {
        warn!("admin bootstrap with missing or wrong setup token");
        return Err(AppError::unauthorized());
    }

    let user_id = services::bootstrap_admin(&state, payload).await?;
    Ok(ApiResponse::with_message("Admin created", CreatedAdmin { user_id }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::json;
    use time::OffsetDateTime;

    use crate::{
        test_support::TestApp,
        users::repo_types::{Role, Trial, TrialType, UserPatch, UserStatus},
    };

    #[tokio::test]
    async fn admin_creates_user_and_gets_password_once() {
        let app = TestApp::new();
        let admin = app.staff_cookie(Role::Admin).await;
        let res = app
            .call(
                Method::POST,
                "/api/users",
                Some(&admin),
                Some(json!({
                    "email": "New@X.com",
                    "displayName": "New",
                    "role": "user",
                    "metadata": { "company": "X" }
                })),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["data"]["email"], "new@x.com");
        assert!(res.body["data"]["password"].as_str().unwrap().len() >= 12);

        let id = res.body["data"]["id"].as_str().unwrap();
        let fetched = app
            .call(Method::GET, &format!("/api/users/{id}"), Some(&admin), None)
            .await;
        assert_eq!(fetched.status, StatusCode::OK);
        assert!(fetched.body["data"].get("password").is_none());
        assert!(fetched.body["data"].get("passwordHash").is_none());
        assert_eq!(fetched.body["data"]["trial"]["type"], "count");
        assert_eq!(fetched.body["data"]["trial"]["limit"], 10);
        assert_eq!(fetched.body["data"]["metadata"]["company"], "X");

        let dup = app
            .call(
                Method::POST,
                "/api/users",
                Some(&admin),
                Some(json!({ "email": "new@x.com", "displayName": "Again", "role": "user" })),
            )
            .await;
        assert_eq!(dup.status, StatusCode::CONFLICT);
        assert_eq!(dup.body["message"], "User with this email already exists");
    }

    #[tokio::test]
    async fn moderator_cannot_create_or_promote() {
        let app = TestApp::new();
        let moderator = app.staff_cookie(Role::Moderator).await;
        let target = app
            .seed_user("u@x.com", "Secret123!", Role::User, UserStatus::Active)
            .await;

        let create = app
            .call(
                Method::POST,
                "/api/users",
                Some(&moderator),
                Some(json!({ "email": "n@x.com", "displayName": "N", "role": "user" })),
            )
            .await;
        assert_eq!(create.status, StatusCode::UNAUTHORIZED);

        let promote = app
            .call(
                Method::PUT,
                &format!("/api/users/{}", target.id),
                Some(&moderator),
                Some(json!({ "role": "admin" })),
            )
            .await;
        assert_eq!(promote.status, StatusCode::UNAUTHORIZED);

        let suspend = app
            .call(
                Method::PUT,
                &format!("/api/users/{}", target.id),
                Some(&moderator),
                Some(json!({ "status": "suspended" })),
            )
            .await;
        assert_eq!(suspend.status, StatusCode::OK);
        assert_eq!(suspend.body["data"]["status"], "suspended");
    }

    #[tokio::test]
    async fn oversized_trial_is_rejected_and_stored_ones_still_list() {
        let app = TestApp::new();
        let admin = app.staff_cookie(Role::Admin).await;
        let res = app
            .call(
                Method::POST,
                "/api/users",
                Some(&admin),
                Some(json!({
                    "email": "t@x.com",
                    "displayName": "T",
                    "role": "user",
                    "trial": { "type": "time", "limit": 9_000_000_000_000_i64 }
                })),
            )
            .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["errors"][0]["field"], "trial.limit");

        // Written before limits were bounded.
        let legacy = app
            .seed_user("old@x.com", "Secret123!", Role::User, UserStatus::Active)
            .await;
        let mut trial = Trial::for_type(TrialType::Time, Some(30), OffsetDateTime::now_utc());
        trial.limit = Some(9_000_000_000_000);
        trial.end_date = None;
        let patch = UserPatch {
            trial: Some(trial),
            ..Default::default()
        };
        app.state
            .store
            .update_user(&legacy.id, patch, OffsetDateTime::now_utc())
            .await
            .unwrap();

        let list = app.call(Method::GET, "/api/users", Some(&admin), None).await;
        assert_eq!(list.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn empty_update_is_rejected() {
        let app = TestApp::new();
        let admin = app.staff_cookie(Role::Admin).await;
        let target = app
            .seed_user("u@x.com", "Secret123!", Role::User, UserStatus::Active)
            .await;
        let res = app
            .call(Method::PUT, &format!("/api/users/{}", target.id), Some(&admin), Some(json!({})))
            .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_filters_by_role() {
        let app = TestApp::new();
        let admin = app.staff_cookie(Role::Admin).await;
        app.seed_user("u1@x.com", "Secret123!", Role::User, UserStatus::Active)
            .await;
        app.seed_user("u2@x.com", "Secret123!", Role::User, UserStatus::Suspended)
            .await;

        let res = app
            .call(Method::GET, "/api/users?role=user", Some(&admin), None)
            .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["data"].as_array().unwrap().len(), 2);

        let res = app
            .call(Method::GET, "/api/users?role=user&status=suspended", Some(&admin), None)
            .await;
        let items = res.body["data"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["email"], "u2@x.com");
    }

    #[tokio::test]
    async fn delete_one_then_all() {
        let app = TestApp::new();
        let admin = app.staff_cookie(Role::Admin).await;
        let target = app
            .seed_user("u@x.com", "Secret123!", Role::User, UserStatus::Active)
            .await;

        let res = app
            .call(Method::DELETE, &format!("/api/users/{}", target.id), Some(&admin), None)
            .await;
        assert_eq!(res.status, StatusCode::OK);
        let gone = app
            .call(Method::GET, &format!("/api/users/{}", target.id), Some(&admin), None)
            .await;
        assert_eq!(gone.status, StatusCode::NOT_FOUND);
        assert_eq!(gone.body["message"], "User not found");

        let res = app.call(Method::DELETE, "/api/users", Some(&admin), None).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["data"]["deletedCount"], 1);
        assert_eq!(res.body["message"], "Successfully deleted 1 users");
    }

    fn bootstrap_request(token: Option<&str>, password: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/users/create-admin")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header("x-setup-token", token);
        }
        let body = json!({ "email": "root@x.com", "password": password });
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn bootstrap_admin_requires_setup_token() {
        let app = TestApp::new();
        let missing = app.send(bootstrap_request(None, "Str0ng!pass")).await;
        let wrong = app.send(bootstrap_request(Some("guess"), "Str0ng!pass")).await;
        assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
        assert!(app
            .state
            .store
            .find_user_by_email("root@x.com")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn bootstrap_admin_checks_strength_and_duplicates() {
        let app = TestApp::new();
        let weak = app.send(bootstrap_request(Some("setup-secret"), "short")).await;
        assert_eq!(weak.status, StatusCode::BAD_REQUEST);
        assert_eq!(weak.body["errors"][0]["field"], "password");

        let ok = app.send(bootstrap_request(Some("setup-secret"), "Str0ng!pass")).await;
        assert_eq!(ok.status, StatusCode::OK);
        let created = app
            .state
            .store
            .find_user_by_email("root@x.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.role, Role::Admin);
        assert_eq!(created.status, UserStatus::Active);
        assert_eq!(ok.body["data"]["userId"], created.id.as_str());

        let again = app.send(bootstrap_request(Some("setup-secret"), "Str0ng!pass")).await;
        assert_eq!(again.status, StatusCode::CONFLICT);
    }
}
