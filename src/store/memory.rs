use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{Store, StoreError, StoreResult};
use crate::{
    analytics::repo_types::{Counter, Counters},
    applications::repo_types::{Application, ApplicationFilter, ApplicationPatch},
    requests::repo_types::{AccessRequest, Decision, RequestStatus},
    users::repo_types::{ApplicationEntry, User, UserFilter, UserPatch},
};

/// Process-local store used for development and tests. Every operation runs
/// under one lock, so conditional writes and entry upserts are atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

#[derive(Default)]
struct Collections {
    users: HashMap<String, User>,
    applications: HashMap<String, Application>,
    requests: HashMap<String, AccessRequest>,
    counters: Counters,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T, F>(mut items: Vec<T>, created_at: F, limit: i64) -> Vec<T>
where
    F: Fn(&T) -> OffsetDateTime,
{
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
    items.truncate(limit.max(0) as usize);
    items
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user(&self, id: &str) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.users.get(id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let db = self.inner.read().await;
        Ok(db.users.values().find(|u| u.email == email).cloned())
    }

    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>> {
        let db = self.inner.read().await;
        let users = db.users.values().filter(|u| filter.matches(u)).cloned().collect();
        Ok(newest_first(users, |u| u.created_at, filter.limit))
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut db = self.inner.write().await;
        if db.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(format!("user {} already exists", user.email)));
        }
        db.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn update_user(&self, id: &str, patch: UserPatch, now: OffsetDateTime) -> StoreResult<User> {
        let mut db = self.inner.write().await;
        let user = db.users.get_mut(id).ok_or(StoreError::NotFound("User"))?;
        patch.apply(user, now);
        Ok(user.clone())
    }

    async fn upsert_user_application(
        &self,
        user_id: &str,
        entry: ApplicationEntry,
        now: OffsetDateTime,
    ) -> StoreResult<()> {
        let mut db = self.inner.write().await;
        let user = db.users.get_mut(user_id).ok_or(StoreError::NotFound("User"))?;
        user.upsert_application(entry, now);
        Ok(())
    }

    async fn record_login(&self, user_id: &str, at: OffsetDateTime) -> StoreResult<()> {
        let mut db = self.inner.write().await;
        let user = db.users.get_mut(user_id).ok_or(StoreError::NotFound("User"))?;
        user.last_login_at = Some(at);
        Ok(())
    }

    async fn set_reset_token(
        &self,
        user_id: &str,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> StoreResult<()> {
        let mut db = self.inner.write().await;
        let user = db.users.get_mut(user_id).ok_or(StoreError::NotFound("User"))?;
        user.reset_token = Some(token.to_string());
        user.reset_token_expires_at = Some(expires_at);
        Ok(())
    }

    async fn delete_user(&self, id: &str) -> StoreResult<User> {
        self.inner
            .write()
            .await
            .users
            .remove(id)
            .ok_or(StoreError::NotFound("User"))
    }

    async fn delete_all_users(&self) -> StoreResult<u64> {
        let mut db = self.inner.write().await;
        let n = db.users.len() as u64;
        db.users.clear();
        Ok(n)
    }

    async fn count_users(&self) -> StoreResult<u64> {
        Ok(self.inner.read().await.users.len() as u64)
    }

    async fn find_application(&self, id: &str) -> StoreResult<Option<Application>> {
        Ok(self.inner.read().await.applications.get(id).cloned())
    }

    async fn find_application_by_name(&self, name: &str) -> StoreResult<Option<Application>> {
        let db = self.inner.read().await;
        Ok(db.applications.values().find(|a| a.name == name).cloned())
    }

    async fn list_applications(&self, filter: &ApplicationFilter) -> StoreResult<Vec<Application>> {
        let db = self.inner.read().await;
        let apps = db
            .applications
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        Ok(newest_first(apps, |a| a.created_at, filter.limit))
    }

    async fn insert_application(&self, app: &Application) -> StoreResult<()> {
        let mut db = self.inner.write().await;
        if db.applications.values().any(|a| a.name == app.name) {
            return Err(StoreError::Conflict(format!(
                "application {} already exists",
                app.name
            )));
        }
        db.applications.insert(app.id.clone(), app.clone());
        Ok(())
    }

    async fn update_application(
        &self,
        id: &str,
        patch: ApplicationPatch,
        now: OffsetDateTime,
    ) -> StoreResult<Application> {
        let mut db = self.inner.write().await;
        if let Some(name) = &patch.name {
            if db.applications.values().any(|a| a.id != id && &a.name == name) {
                return Err(StoreError::Conflict(format!("application {name} already exists")));
            }
        }
        let app = db
            .applications
            .get_mut(id)
            .ok_or(StoreError::NotFound("Application"))?;
        patch.apply(app, now);
        Ok(app.clone())
    }

    async fn delete_application(&self, id: &str) -> StoreResult<Application> {
        self.inner
            .write()
            .await
            .applications
            .remove(id)
            .ok_or(StoreError::NotFound("Application"))
    }

    async fn delete_all_applications(&self) -> StoreResult<u64> {
        let mut db = self.inner.write().await;
        let n = db.applications.len() as u64;
        db.applications.clear();
        Ok(n)
    }

    async fn count_applications(&self) -> StoreResult<u64> {
        Ok(self.inner.read().await.applications.len() as u64)
    }

    async fn insert_request(&self, request: &AccessRequest) -> StoreResult<()> {
        let mut db = self.inner.write().await;
        db.requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn find_request(&self, id: &str) -> StoreResult<Option<AccessRequest>> {
        Ok(self.inner.read().await.requests.get(id).cloned())
    }

    async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        limit: i64,
    ) -> StoreResult<Vec<AccessRequest>> {
        let db = self.inner.read().await;
        let rows = db
            .requests
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        Ok(newest_first(rows, |r| r.created_at, limit))
    }

    async fn finalize_request(&self, id: &str, decision: &Decision) -> StoreResult<AccessRequest> {
        let mut db = self.inner.write().await;
        let request = db
            .requests
            .get_mut(id)
            .ok_or(StoreError::NotFound("Access request"))?;
        if request.status != RequestStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "access request is already {}",
                request.status
            )));
        }
        decision.apply(request);
        Ok(request.clone())
    }

    async fn link_request_user(&self, id: &str, user_id: &str) -> StoreResult<()> {
        let mut db = self.inner.write().await;
        let request = db
            .requests
            .get_mut(id)
            .ok_or(StoreError::NotFound("Access request"))?;
        request.user_id = Some(user_id.to_string());
        Ok(())
    }

    async fn count_requests(&self, status: RequestStatus) -> StoreResult<u64> {
        let db = self.inner.read().await;
        Ok(db.requests.values().filter(|r| r.status == status).count() as u64)
    }

    async fn increment_counter(&self, counter: Counter, at: OffsetDateTime) -> StoreResult<()> {
        self.inner.write().await.counters.bump(counter, at);
        Ok(())
    }

    async fn counters(&self) -> StoreResult<Counters> {
        Ok(self.inner.read().await.counters.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::repo_types::{EntryStatus, Role, Trial, TrialType, UserStatus};
    use std::sync::Arc;
    use time::{macros::datetime, Duration};

    fn request(id: &str, created_at: OffsetDateTime, status: RequestStatus) -> AccessRequest {
        AccessRequest {
            id: id.into(),
            full_name: "A".into(),
            email: "a@x.com".into(),
            company: "X".into(),
            job_title: "Eng".into(),
            phone: None,
            application_id: "app1".into(),
            use_case: "test".into(),
            status,
            created_at,
            processed_at: None,
            processed_by: None,
            notes: None,
            user_id: None,
        }
    }

    fn decision(by: &str) -> Decision {
        Decision {
            status: RequestStatus::Approved,
            processed_at: datetime!(2026-01-02 00:00 UTC),
            processed_by: by.into(),
            notes: Some("ok".into()),
            user_id: None,
        }
    }

    #[tokio::test]
    async fn finalize_only_moves_pending_requests() {
        let store = MemoryStore::new();
        store
            .insert_request(&request("r1", datetime!(2026-01-01 00:00 UTC), RequestStatus::Pending))
            .await
            .unwrap();

        let done = store.finalize_request("r1", &decision("admin-1")).await.unwrap();
        assert_eq!(done.status, RequestStatus::Approved);
        assert_eq!(done.user_id, None);
        store.link_request_user("r1", "u1").await.unwrap();

        let err = store.finalize_request("r1", &decision("admin-2")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let kept = store.find_request("r1").await.unwrap().unwrap();
        assert_eq!(kept.processed_by.as_deref(), Some("admin-1"));
        assert_eq!(kept.user_id.as_deref(), Some("u1"));

        let missing = store.finalize_request("nope", &decision("a")).await.unwrap_err();
        assert!(matches!(missing, StoreError::NotFound(_)));
        let unlinked = store.link_request_user("nope", "u1").await.unwrap_err();
        assert!(matches!(unlinked, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_finalize_has_one_winner() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_request(&request("r1", datetime!(2026-01-01 00:00 UTC), RequestStatus::Pending))
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.finalize_request("r1", &decision(&format!("admin-{i}"))).await })
            })
            .collect();
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn list_requests_is_newest_first_filtered_and_capped() {
        let store = MemoryStore::new();
        let base = datetime!(2026-01-01 00:00 UTC);
        for i in 0..5 {
            let status = if i % 2 == 0 { RequestStatus::Pending } else { RequestStatus::Rejected };
            store
                .insert_request(&request(&format!("r{i}"), base + Duration::minutes(i), status))
                .await
                .unwrap();
        }

        let all = store.list_requests(None, 3).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r4", "r3", "r2"]);

        let pending = store.list_requests(Some(RequestStatus::Pending), 10).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r4", "r2", "r0"]);
        assert_eq!(store.count_requests(RequestStatus::Rejected).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn user_email_is_unique() {
        let store = MemoryStore::new();
        let now = datetime!(2026-01-01 00:00 UTC);
        let a = User::new("a@x.com", "A", "h".into(), Role::User, UserStatus::Active, now);
        let b = User::new("a@x.com", "B", "h".into(), Role::User, UserStatus::Active, now);
        store.insert_user(&a).await.unwrap();
        assert!(matches!(store.insert_user(&b).await, Err(StoreError::Conflict(_))));
        assert_eq!(store.count_users().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_entry_upserts_for_one_user_all_land() {
        let store = Arc::new(MemoryStore::new());
        let now = datetime!(2026-01-01 00:00 UTC);
        let user = User::new("a@x.com", "A", "h".into(), Role::User, UserStatus::Active, now);
        store.insert_user(&user).await.unwrap();

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let store = store.clone();
                let id = user.id.clone();
                tokio::spawn(async move {
                    let entry = ApplicationEntry {
                        application_id: format!("app{i}"),
                        status: EntryStatus::Approved,
                        approved_at: Some(now),
                        rejected_at: None,
                        trial: Trial::for_type(TrialType::Count, Some(10), now),
                    };
                    store.upsert_user_application(&id, entry, now).await
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        let stored = store.find_user(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.applications.len(), 6);
    }

    #[tokio::test]
    async fn counters_only_go_up() {
        let store = MemoryStore::new();
        let at = datetime!(2026-01-01 00:00 UTC);
        store.increment_counter(Counter::ApprovedRequests, at).await.unwrap();
        store.increment_counter(Counter::ApprovedRequests, at).await.unwrap();
        store.increment_counter(Counter::RejectedRequests, at).await.unwrap();
        let c = store.counters().await.unwrap();
        assert_eq!((c.approved_requests, c.rejected_requests), (2, 1));
        assert_eq!(c.updated_at, Some(at));
    }
}
