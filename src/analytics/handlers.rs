use axum::{extract::State, response::IntoResponse, routing::get, Router};
use serde::Serialize;
use tracing::instrument;

use crate::{
    auth::extractors::AuthSession,
    error::AppResult,
    requests::repo_types::RequestStatus,
    response::ApiResponse,
    state::AppState,
};

pub fn analytics_routes() -> Router<AppState> {
    Router::new().route("/analytics/dashboard", get(dashboard))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_users: u64,
    pub total_applications: u64,
    pub pending_requests: u64,
    pub approved_requests: i64,
    pub rejected_requests: i64,
    pub approval_rate: f64,
}

#[instrument(skip_all)]
pub async fn dashboard(
    State(state): State<AppState>,
    session: AuthSession,
) -> AppResult<impl IntoResponse> {
    session.require_staff()?;
    let counters = state.store.counters().await?;
    let stats = DashboardStats {
        total_users: state.store.count_users().await?,
        total_applications: state.store.count_applications().await?,
        pending_requests: state.store.count_requests(RequestStatus::Pending).await?,
        approved_requests: counters.approved_requests,
        rejected_requests: counters.rejected_requests,
        approval_rate: counters.approval_rate(),
    };
    Ok(ApiResponse::data(stats))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::{
        applications::repo_types::TrialDefaults, test_support::TestApp, users::repo_types::Role,
    };

    #[tokio::test]
    async fn dashboard_reflects_decisions() {
        let app = TestApp::new();
        let admin = app.staff_cookie(Role::Admin).await;
        let target = app.seed_application("Lab", TrialDefaults::default()).await;

        let mut ids = Vec::new();
        for email in ["a@x.com", "b@x.com", "c@x.com", "d@x.com", "e@x.com"] {
            let res = app
                .call(
                    Method::POST,
                    "/api/access-requests",
                    None,
                    Some(json!({
                        "fullName": "N", "email": email, "company": "X", "jobTitle": "Eng",
                        "applicationId": target.id, "useCase": "demo"
                    })),
                )
                .await;
            ids.push(res.body["data"]["id"].as_str().unwrap().to_string());
        }
        for (id, verb) in ids.iter().zip(["approve", "approve", "approve", "reject"]) {
            let res = app
                .call(Method::PUT, &format!("/api/access-requests/{id}/{verb}"), Some(&admin), None)
                .await;
            assert_eq!(res.status, StatusCode::OK);
        }

        let res = app
            .call(Method::GET, "/api/analytics/dashboard", Some(&admin), None)
            .await;
        assert_eq!(res.status, StatusCode::OK);
        let data = &res.body["data"];
        // admin plus four provisioned applicants
        assert_eq!(data["totalUsers"], 5);
        assert_eq!(data["totalApplications"], 1);
        assert_eq!(data["pendingRequests"], 1);
        assert_eq!(data["approvedRequests"], 3);
        assert_eq!(data["rejectedRequests"], 1);
        assert_eq!(data["approvalRate"], 75.0);
    }

    #[tokio::test]
    async fn empty_dashboard_has_zero_rate() {
        let app = TestApp::new();
        let moderator = app.staff_cookie(Role::Moderator).await;
        let res = app
            .call(Method::GET, "/api/analytics/dashboard", Some(&moderator), None)
            .await;
        assert_eq!(res.body["data"]["approvalRate"], 0.0);
        assert_eq!(res.body["data"]["approvedRequests"], 0);
    }

    #[tokio::test]
    async fn dashboard_is_staff_only() {
        let app = TestApp::new();
        let user = app.staff_cookie(Role::User).await;
        let res = app
            .call(Method::GET, "/api/analytics/dashboard", Some(&user), None)
            .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }
}
