//! Access request lifecycle.
//!
//! A request leaves `pending` exactly once. Processing first claims the request
//! with a conditional write, then provisions the user, links the user to the
//! request and bumps the counter. These writes are not transactional, so a
//! failure after the claim is reported as partially applied with the steps
//! that did land.

use serde_json::json;
use time::OffsetDateTime;
use tracing::{info, warn};

use super::{
    dto::{NewAccessRequest, ProcessOutcome},
    repo_types::{AccessRequest, Decision, RequestStatus},
};
use crate::{
    analytics::repo_types::Counter,
    applications::repo_types::TrialDefaults,
    auth::{
        password::{generate_secure_password, hash_password},
        services::normalize_email,
    },
    error::{AppError, AppResult},
    state::AppState,
    store::StoreError,
    users::repo_types::{
        ApplicationEntry, EntryStatus, Role, Trial, TrialType, User, UserMetadata, UserStatus,
    },
};

pub const STEP_RECORD_DECISION: &str = "recordDecision";
pub const STEP_PROVISION_USER: &str = "provisionUser";
pub const STEP_LINK_USER: &str = "linkUser";
pub const STEP_INCREMENT_COUNTER: &str = "incrementCounter";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Reject,
}

impl Verdict {
    fn verb(self) -> &'static str {
        match self {
            Verdict::Approve => "approve",
            Verdict::Reject => "reject",
        }
    }

    pub fn request_status(self) -> RequestStatus {
        match self {
            Verdict::Approve => RequestStatus::Approved,
            Verdict::Reject => RequestStatus::Rejected,
        }
    }

    fn counter(self) -> Counter {
        match self {
            Verdict::Approve => Counter::ApprovedRequests,
            Verdict::Reject => Counter::RejectedRequests,
        }
    }

    /// Status given to an account created by this decision.
    fn new_user_status(self) -> UserStatus {
        match self {
            Verdict::Approve => UserStatus::Active,
            Verdict::Reject => UserStatus::Suspended,
        }
    }

    /// Approvals copy the application's trial defaults (ten sessions without
    /// them) and leave the trial open-ended. Rejections always get a
    /// zero-session trial that ended at the moment of the decision.
    pub fn trial(self, defaults: Option<&TrialDefaults>, now: OffsetDateTime) -> Trial {
        let (kind, limit) = match (self, defaults) {
            (Verdict::Approve, Some(d)) => (d.kind, d.limit),
            (Verdict::Approve, None) => (TrialType::Count, Some(10)),
            (Verdict::Reject, _) => (TrialType::Count, Some(0)),
        };
        Trial {
            kind,
            limit,
            used: 0,
            start_date: now,
            end_date: match self {
                Verdict::Approve => None,
                Verdict::Reject => Some(now),
            },
        }
    }

    pub fn entry(
        self,
        application_id: &str,
        defaults: Option<&TrialDefaults>,
        now: OffsetDateTime,
    ) -> ApplicationEntry {
        let (status, approved_at, rejected_at) = match self {
            Verdict::Approve => (EntryStatus::Approved, Some(now), None),
            Verdict::Reject => (EntryStatus::Rejected, None, Some(now)),
        };
        ApplicationEntry {
            application_id: application_id.to_string(),
            status,
            approved_at,
            rejected_at,
            trial: self.trial(defaults, now),
        }
    }
}

pub async fn submit(state: &AppState, new: NewAccessRequest) -> AppResult<AccessRequest> {
    let request = AccessRequest {
        id: uuid::Uuid::new_v4().to_string(),
        full_name: new.full_name,
        email: new.email,
        company: new.company,
        job_title: new.job_title,
        phone: new.phone,
        application_id: new.application_id,
        use_case: new.use_case,
        status: RequestStatus::Pending,
        created_at: OffsetDateTime::now_utc(),
        processed_at: None,
        processed_by: None,
        notes: None,
        user_id: None,
    };
    state.store.insert_request(&request).await?;

    info!(request_id = %request.id, application_id = %request.application_id, "access request submitted");
    state
        .events
        .write(
            "requests.submit.success",
            json!({
                "requestId": request.id,
                "email": request.email,
                "applicationId": request.application_id,
            }),
        )
        .await;
    Ok(request)
}

pub async fn list(
    state: &AppState,
    status: Option<RequestStatus>,
    limit: i64,
) -> AppResult<Vec<AccessRequest>> {
    Ok(state.store.list_requests(status, limit).await?)
}

/// Approves or rejects a pending request on behalf of `actor_id`.
pub async fn process(
    state: &AppState,
    request_id: &str,
    verdict: Verdict,
    notes: Option<String>,
    actor_id: &str,
) -> AppResult<ProcessOutcome> {
    let request = state
        .store
        .find_request(request_id)
        .await?
        .ok_or(AppError::NotFound("Access request"))?;
    decide(state, &request, verdict, notes, actor_id).await
}

/// `request` may already be stale; only the conditional claim decides the
/// winner, and nothing is written to the user before it succeeds.
async fn decide(
    state: &AppState,
    request: &AccessRequest,
    verdict: Verdict,
    notes: Option<String>,
    actor_id: &str,
) -> AppResult<ProcessOutcome> {
    let verb = verdict.verb();
    let request_id = request.id.as_str();

    if request.status.is_terminal() {
        return Err(conflict(state, verb, request_id, request.status).await);
    }

    let application = state.store.find_application(&request.application_id).await?;
    if application.is_none() {
        warn!(
            request_id,
            application_id = %request.application_id,
            "application missing; using fallback trial"
        );
    }
    let defaults = application.as_ref().map(|a| &a.trial_defaults);
    let now = OffsetDateTime::now_utc();
    let email = normalize_email(&request.email);

    let decision = Decision {
        status: verdict.request_status(),
        processed_at: now,
        processed_by: actor_id.to_string(),
        notes: notes.filter(|n| !n.trim().is_empty()),
        user_id: None,
    };
    match state.store.finalize_request(request_id, &decision).await {
        Ok(_) => {}
        Err(StoreError::Conflict(_)) => {
            // Another decision landed after `request` was read.
            let current = state
                .store
                .find_request(request_id)
                .await?
                .map_or(verdict.request_status(), |r| r.status);
            return Err(conflict(state, verb, request_id, current).await);
        }
        Err(e) => return Err(e.into()),
    }

    let Provisioned {
        user_id,
        created,
        temporary_password,
    } = match provision_user(state, request, &email, verdict, defaults, now).await {
        Ok(provisioned) => provisioned,
        Err(e) => {
            return Err(partial(state, verb, request_id, &[STEP_RECORD_DECISION], STEP_PROVISION_USER, e).await);
        }
    };

    if let Err(e) = state.store.link_request_user(request_id, &user_id).await {
        return Err(partial(
            state,
            verb,
            request_id,
            &[STEP_RECORD_DECISION, STEP_PROVISION_USER],
            STEP_LINK_USER,
            e.into(),
        )
        .await);
    }

    if let Err(e) = state.store.increment_counter(verdict.counter(), now).await {
        return Err(partial(
            state,
            verb,
            request_id,
            &[STEP_RECORD_DECISION, STEP_PROVISION_USER, STEP_LINK_USER],
            STEP_INCREMENT_COUNTER,
            e.into(),
        )
        .await);
    }

    let email_details = match verdict {
        Verdict::Approve => json!({
            "type": "approval_welcome",
            "to": email,
            "applicationId": request.application_id,
            "temporaryPasswordProvided": temporary_password.is_some(),
        }),
        Verdict::Reject => json!({
            "type": "request_rejected",
            "to": email,
            "applicationId": request.application_id,
            "reasonProvided": decision.notes.is_some(),
        }),
    };
    state.events.write("email.queue", email_details).await;

    info!(request_id, user_id = %user_id, actor_id, verdict = verb, "access request processed");
    state
        .events
        .write(
            &format!("requests.{verb}.success"),
            json!({
                "requestId": request_id,
                "userId": user_id,
                "processedBy": actor_id,
                "newUser": created,
            }),
        )
        .await;

    Ok(ProcessOutcome {
        request_id: request_id.to_string(),
        email,
        status: verdict.request_status(),
        user_id,
        temporary_password,
    })
}

struct Provisioned {
    user_id: String,
    created: bool,
    /// Only for accounts created by an approval.
    temporary_password: Option<String>,
}

impl Provisioned {
    fn existing(user_id: String) -> Self {
        Self {
            user_id,
            created: false,
            temporary_password: None,
        }
    }
}

/// Resolves the account for the request's email, creating it if needed, and
/// writes this decision's application entry onto it.
async fn provision_user(
    state: &AppState,
    request: &AccessRequest,
    email: &str,
    verdict: Verdict,
    defaults: Option<&TrialDefaults>,
    now: OffsetDateTime,
) -> anyhow::Result<Provisioned> {
    let entry = verdict.entry(&request.application_id, defaults, now);

    if let Some(existing) = state.store.find_user_by_email(email).await? {
        let replaced = existing.application(&request.application_id).is_some();
        state
            .store
            .upsert_user_application(&existing.id, entry, now)
            .await?;
        info!(user_id = %existing.id, replaced, "application entry written on existing user");
        return Ok(Provisioned::existing(existing.id));
    }

    let password = generate_secure_password();
    let password_hash = hash_password(&password).await?;
    let display_name = if request.full_name.trim().is_empty() {
        email.to_string()
    } else {
        request.full_name.clone()
    };
    let mut user = User::new(
        email,
        display_name,
        password_hash,
        Role::User,
        verdict.new_user_status(),
        now,
    );
    user.metadata = UserMetadata {
        company: Some(request.company.clone()),
        job_title: Some(request.job_title.clone()),
        phone: request.phone.clone(),
    };
    user.applications.push(entry.clone());

    match state.store.insert_user(&user).await {
        Ok(()) => {
            info!(user_id = %user.id, status = %user.status, "user provisioned from access request");
            Ok(Provisioned {
                user_id: user.id,
                created: true,
                temporary_password: (verdict == Verdict::Approve).then_some(password),
            })
        }
        Err(StoreError::Conflict(_)) => {
            // Created concurrently for the same email; attach to that account.
            let existing = state
                .store
                .find_user_by_email(email)
                .await?
                .ok_or_else(|| anyhow::anyhow!("user {email} vanished after email conflict"))?;
            state
                .store
                .upsert_user_application(&existing.id, entry, now)
                .await?;
            Ok(Provisioned::existing(existing.id))
        }
        Err(e) => Err(e.into()),
    }
}

async fn conflict(state: &AppState, verb: &str, request_id: &str, current: RequestStatus) -> AppError {
    warn!(request_id, %current, "access request already processed");
    state
        .events
        .write(
            &format!("requests.{verb}.conflict"),
            json!({ "requestId": request_id, "currentStatus": current }),
        )
        .await;
    AppError::Conflict(format!("Access request is already {current}"))
}

async fn partial(
    state: &AppState,
    verb: &str,
    request_id: &str,
    completed: &[&'static str],
    failed: &'static str,
    cause: anyhow::Error,
) -> AppError {
    state
        .events
        .write(
            &format!("requests.{verb}.partial"),
            json!({
                "requestId": request_id,
                "completedSteps": completed,
                "failedStep": failed,
                "error": cause.to_string(),
            }),
        )
        .await;
    AppError::PartiallyApplied {
        message: format!("Access request {verb} was only partially applied"),
        completed: completed.to_vec(),
        failed,
        cause,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    use crate::test_support::TestApp;

    fn new_request(application_id: &str) -> NewAccessRequest {
        NewAccessRequest {
            full_name: "A".into(),
            email: "a@x.com".into(),
            company: "X".into(),
            job_title: "Eng".into(),
            phone: None,
            application_id: application_id.into(),
            use_case: "test".into(),
        }
    }

    #[test]
    fn approve_trial_is_open_ended() {
        let now = datetime!(2026-05-01 00:00 UTC);
        let fallback = Verdict::Approve.trial(None, now);
        assert_eq!((fallback.kind, fallback.limit, fallback.used), (TrialType::Count, Some(10), 0));
        assert_eq!(fallback.end_date, None);

        let defaults = TrialDefaults {
            kind: TrialType::Time,
            limit: Some(14),
        };
        let copied = Verdict::Approve.trial(Some(&defaults), now);
        assert_eq!((copied.kind, copied.limit), (TrialType::Time, Some(14)));
        assert_eq!(copied.start_date, now);
        assert_eq!(copied.end_date, None);
    }

    #[test]
    fn reject_trial_is_already_over() {
        let now = datetime!(2026-05-01 00:00 UTC);
        let fallback = Verdict::Reject.trial(None, now);
        assert_eq!((fallback.limit, fallback.used), (Some(0), 0));
        assert_eq!(fallback.end_date, Some(now));
        assert!(fallback.is_expired(now));

        let defaults = TrialDefaults {
            kind: TrialType::Unlimited,
            limit: None,
        };
        let inert = Verdict::Reject.trial(Some(&defaults), now);
        assert_eq!((inert.kind, inert.limit), (TrialType::Count, Some(0)));
        assert_eq!(inert.end_date, Some(now));
        assert!(inert.is_expired(now));
    }

    #[test]
    fn entries_carry_exactly_one_decision_time() {
        let now = datetime!(2026-05-01 00:00 UTC);
        let approved = Verdict::Approve.entry("app1", None, now);
        assert_eq!(approved.status, EntryStatus::Approved);
        assert_eq!((approved.approved_at, approved.rejected_at), (Some(now), None));

        let rejected = Verdict::Reject.entry("app1", None, now);
        assert_eq!(rejected.status, EntryStatus::Rejected);
        assert_eq!((rejected.approved_at, rejected.rejected_at), (None, Some(now)));
    }

    #[tokio::test]
    async fn losing_reject_leaves_the_winning_approval_intact() {
        let app = TestApp::new();
        let target = app.seed_application("Lab", TrialDefaults::default()).await;
        let pending = submit(&app.state, new_request(&target.id)).await.unwrap();

        // Both admins read the request while it was pending; the approval lands first.
        let stale = app.state.store.find_request(&pending.id).await.unwrap().unwrap();
        let approved = process(&app.state, &pending.id, Verdict::Approve, None, "admin-1")
            .await
            .unwrap();

        let err = decide(&app.state, &stale, Verdict::Reject, Some("no".into()), "admin-2")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == "Access request is already approved"));

        let user = app.state.store.find_user(&approved.user_id).await.unwrap().unwrap();
        assert_eq!(user.status, UserStatus::Active);
        assert_eq!(user.applications.len(), 1);
        let entry = user.application(&target.id).unwrap();
        assert_eq!(entry.status, EntryStatus::Approved);
        assert!(entry.approved_at.is_some());
        assert_eq!(entry.rejected_at, None);
        assert_eq!(entry.trial.limit, Some(10));

        let request = app.state.store.find_request(&pending.id).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Approved);
        assert_eq!(request.processed_by.as_deref(), Some("admin-1"));
        assert_eq!(request.user_id.as_deref(), Some(approved.user_id.as_str()));
        assert_eq!(request.notes, None);

        let counters = app.state.store.counters().await.unwrap();
        assert_eq!((counters.approved_requests, counters.rejected_requests), (1, 0));
    }

    #[tokio::test]
    async fn concurrent_decisions_have_one_winner() {
        let app = TestApp::new();
        let target = app.seed_application("Lab", TrialDefaults::default()).await;
        let pending = submit(&app.state, new_request(&target.id)).await.unwrap();

        let approve = process(&app.state, &pending.id, Verdict::Approve, None, "admin-1");
        let reject = process(&app.state, &pending.id, Verdict::Reject, None, "admin-2");
        let (approve, reject) = tokio::join!(approve, reject);
        assert!(approve.is_ok() != reject.is_ok());

        let request = app.state.store.find_request(&pending.id).await.unwrap().unwrap();
        let user = app.state.store.find_user_by_email("a@x.com").await.unwrap().unwrap();
        let entry = user.application(&target.id).unwrap();
        let expected = match request.status {
            RequestStatus::Approved => EntryStatus::Approved,
            _ => EntryStatus::Rejected,
        };
        assert_eq!(entry.status, expected);
        assert_eq!(request.user_id.as_deref(), Some(user.id.as_str()));
    }
}
