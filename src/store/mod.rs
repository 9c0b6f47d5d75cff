//! Document store seam. Handlers and services only see the typed entities;
//! each backend parses its records into them at this boundary.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    analytics::repo_types::{Counter, Counters},
    applications::repo_types::{Application, ApplicationFilter, ApplicationPatch},
    requests::repo_types::{AccessRequest, Decision, RequestStatus},
    users::repo_types::{ApplicationEntry, User, UserFilter, UserPatch},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A uniqueness rule or a conditional write did not hold.
    #[error("{0}")]
    Conflict(String),

    #[error("corrupt {collection} record {id}: {reason}")]
    Corrupt {
        collection: &'static str,
        id: String,
        reason: String,
    },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_user(&self, id: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    /// Newest first, capped at `filter.limit`.
    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>>;
    /// Fails with `Conflict` when the email is already taken.
    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    async fn update_user(&self, id: &str, patch: UserPatch, now: OffsetDateTime) -> StoreResult<User>;
    /// Replaces or appends one application entry while holding the user
    /// exclusively, so concurrent upserts for different applications both land.
    async fn upsert_user_application(
        &self,
        user_id: &str,
        entry: ApplicationEntry,
        now: OffsetDateTime,
    ) -> StoreResult<()>;
    async fn record_login(&self, user_id: &str, at: OffsetDateTime) -> StoreResult<()>;
    async fn set_reset_token(
        &self,
        user_id: &str,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> StoreResult<()>;
    async fn delete_user(&self, id: &str) -> StoreResult<User>;
    async fn delete_all_users(&self) -> StoreResult<u64>;
    async fn count_users(&self) -> StoreResult<u64>;

    async fn find_application(&self, id: &str) -> StoreResult<Option<Application>>;
    async fn find_application_by_name(&self, name: &str) -> StoreResult<Option<Application>>;
    async fn list_applications(&self, filter: &ApplicationFilter) -> StoreResult<Vec<Application>>;
    /// Fails with `Conflict` when the name is already taken.
    async fn insert_application(&self, app: &Application) -> StoreResult<()>;
    async fn update_application(
        &self,
        id: &str,
        patch: ApplicationPatch,
        now: OffsetDateTime,
    ) -> StoreResult<Application>;
    async fn delete_application(&self, id: &str) -> StoreResult<Application>;
    async fn delete_all_applications(&self) -> StoreResult<u64>;
    async fn count_applications(&self) -> StoreResult<u64>;

    async fn insert_request(&self, request: &AccessRequest) -> StoreResult<()>;
    async fn find_request(&self, id: &str) -> StoreResult<Option<AccessRequest>>;
    /// Newest first, optionally filtered by status, capped at `limit`.
    async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        limit: i64,
    ) -> StoreResult<Vec<AccessRequest>>;
    /// Writes the decision only if the request is still pending; otherwise
    /// `Conflict` and nothing changes.
    async fn finalize_request(&self, id: &str, decision: &Decision) -> StoreResult<AccessRequest>;
    /// Points an already decided request at the account it provisioned.
    async fn link_request_user(&self, id: &str, user_id: &str) -> StoreResult<()>;
    async fn count_requests(&self, status: RequestStatus) -> StoreResult<u64>;

    /// Atomic increment-by-one; never read-modify-write on the caller side.
    async fn increment_counter(&self, counter: Counter, at: OffsetDateTime) -> StoreResult<()>;
    async fn counters(&self) -> StoreResult<Counters>;
}
