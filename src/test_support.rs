//! Helpers for driving the full router in tests.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use time::OffsetDateTime;
use tower::ServiceExt;

use crate::{
    analytics::repo_types::{Counter, Counters},
    app::build_app,
    applications::repo_types::{
        Application, ApplicationFilter, ApplicationPatch, ApplicationStatus, HealthCheck,
        HealthStatus, Platform, TrialDefaults,
    },
    auth::{claims::Identity, password::hash_password},
    requests::repo_types::{AccessRequest, Decision, RequestStatus},
    state::AppState,
    store::{MemoryStore, Store, StoreError, StoreResult},
    users::repo_types::{ApplicationEntry, Role, User, UserFilter, UserPatch, UserStatus},
};

pub struct TestApp {
    pub state: AppState,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn location(&self) -> Option<&str> {
        self.headers.get(header::LOCATION).and_then(|v| v.to_str().ok())
    }

    pub fn set_cookie(&self) -> Option<&str> {
        self.headers.get(header::SET_COOKIE).and_then(|v| v.to_str().ok())
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self {
            state: AppState::fake(),
        }
    }

    /// Same config as `new`, backed by `store`.
    pub fn with_store(store: Arc<dyn Store>) -> Self {
        let base = AppState::fake();
        Self {
            state: AppState::from_parts(store, base.config.clone()),
        }
    }

    pub fn router(&self) -> Router {
        build_app(self.state.clone())
    }

    pub async fn seed_user(&self, email: &str, password: &str, role: Role, status: UserStatus) -> User {
        let hash = hash_password(password).await.unwrap();
        let user = User::new(email, email, hash, role, status, OffsetDateTime::now_utc());
        self.state.store.insert_user(&user).await.unwrap();
        user
    }

    pub async fn seed_application(&self, name: &str, trial_defaults: TrialDefaults) -> Application {
        let now = OffsetDateTime::now_utc();
        let app = Application {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: format!("{name} description"),
            platform: Platform::Desktop,
            auth_required: true,
            max_users: 50,
            current_users: 0,
            trial_defaults,
            status: ApplicationStatus::Active,
            health_check: HealthCheck {
                last_check: now,
                status: HealthStatus::Healthy,
            },
            created_at: now,
            updated_at: now,
        };
        self.state.store.insert_application(&app).await.unwrap();
        app
    }

    /// `Cookie` header value carrying a fresh session for `user`.
    pub fn cookie_for(&self, user: &User) -> String {
        let identity = Identity {
            user_id: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
        };
        let (token, _) = self.state.tokens.create_session_token(&identity, false).unwrap();
        format!("session={token}")
    }

    pub async fn staff_cookie(&self, role: Role) -> String {
        let email = format!("{}-{}@vrdash.test", role, uuid::Uuid::new_v4());
        let user = self.seed_user(&email, "Str0ng!pass", role, UserStatus::Active).await;
        self.cookie_for(&user)
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let res = self.router().oneshot(request).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }
}

/// Write that `FaultyStore` refuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    InsertUser,
    IncrementCounter,
}

/// `MemoryStore` whose `fault` write fails with a backend error once armed,
/// so fixtures can be seeded first.
pub struct FaultyStore {
    inner: MemoryStore,
    fault: Fault,
    armed: AtomicBool,
}

impl FaultyStore {
    pub fn new(fault: Fault) -> Self {
        Self {
            inner: MemoryStore::new(),
            fault,
            armed: AtomicBool::new(false),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    fn check(&self, op: Fault) -> StoreResult<()> {
        if self.fault == op && self.armed.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!("{op:?} unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn find_user(&self, id: &str) -> StoreResult<Option<User>> {
        self.inner.find_user(id).await
    }
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.inner.find_user_by_email(email).await
    }
    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>> {
        self.inner.list_users(filter).await
    }
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        self.check(Fault::InsertUser)?;
        self.inner.insert_user(user).await
    }
    async fn update_user(&self, id: &str, patch: UserPatch, now: OffsetDateTime) -> StoreResult<User> {
        self.inner.update_user(id, patch, now).await
    }
    async fn upsert_user_application(
        &self,
        user_id: &str,
        entry: ApplicationEntry,
        now: OffsetDateTime,
    ) -> StoreResult<()> {
        self.inner.upsert_user_application(user_id, entry, now).await
    }
    async fn record_login(&self, user_id: &str, at: OffsetDateTime) -> StoreResult<()> {
        self.inner.record_login(user_id, at).await
    }
    async fn set_reset_token(
        &self,
        user_id: &str,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> StoreResult<()> {
        self.inner.set_reset_token(user_id, token, expires_at).await
    }
    async fn delete_user(&self, id: &str) -> StoreResult<User> {
        self.inner.delete_user(id).await
    }
    async fn delete_all_users(&self) -> StoreResult<u64> {
        self.inner.delete_all_users().await
    }
    async fn count_users(&self) -> StoreResult<u64> {
        self.inner.count_users().await
    }

    async fn find_application(&self, id: &str) -> StoreResult<Option<Application>> {
        self.inner.find_application(id).await
    }
    async fn find_application_by_name(&self, name: &str) -> StoreResult<Option<Application>> {
        self.inner.find_application_by_name(name).await
    }
    async fn list_applications(&self, filter: &ApplicationFilter) -> StoreResult<Vec<Application>> {
        self.inner.list_applications(filter).await
    }
    async fn insert_application(&self, app: &Application) -> StoreResult<()> {
        self.inner.insert_application(app).await
    }
    async fn update_application(
        &self,
        id: &str,
        patch: ApplicationPatch,
        now: OffsetDateTime,
    ) -> StoreResult<Application> {
        self.inner.update_application(id, patch, now).await
    }
    async fn delete_application(&self, id: &str) -> StoreResult<Application> {
        self.inner.delete_application(id).await
    }
    async fn delete_all_applications(&self) -> StoreResult<u64> {
        self.inner.delete_all_applications().await
    }
    async fn count_applications(&self) -> StoreResult<u64> {
        self.inner.count_applications().await
    }

    async fn insert_request(&self, request: &AccessRequest) -> StoreResult<()> {
        self.inner.insert_request(request).await
    }
    async fn find_request(&self, id: &str) -> StoreResult<Option<AccessRequest>> {
        self.inner.find_request(id).await
    }
    async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        limit: i64,
    ) -> StoreResult<Vec<AccessRequest>> {
        self.inner.list_requests(status, limit).await
    }
    async fn finalize_request(&self, id: &str, decision: &Decision) -> StoreResult<AccessRequest> {
        self.inner.finalize_request(id, decision).await
    }
    async fn link_request_user(&self, id: &str, user_id: &str) -> StoreResult<()> {
        self.inner.link_request_user(id, user_id).await
    }
    async fn count_requests(&self, status: RequestStatus) -> StoreResult<u64> {
        self.inner.count_requests(status).await
    }

    async fn increment_counter(&self, counter: Counter, at: OffsetDateTime) -> StoreResult<()> {
        self.check(Fault::IncrementCounter)?;
        self.inner.increment_counter(counter, at).await
    }
    async fn counters(&self) -> StoreResult<Counters> {
        self.inner.counters().await
    }
}
