use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

text_enum! {
    pub enum Role {
        Admin => "admin",
        Moderator => "moderator",
        User => "user",
    }
}

impl Role {
    /// Admins and moderators may operate the dashboard.
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Admin | Role::Moderator)
    }
}

text_enum! {
    pub enum UserStatus {
        Active => "active",
        Suspended => "suspended",
        Inactive => "inactive",
    }
}

text_enum! {
    pub enum EntryStatus {
        Approved => "approved",
        Rejected => "rejected",
    }
}

text_enum! {
    pub enum TrialType {
        Count => "count",
        Time => "time",
        Unlimited => "unlimited",
    }
}

/// Usage allowance attached to a user or to one of their application entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    #[serde(rename = "type")]
    pub kind: TrialType,
    pub limit: Option<i64>,
    #[serde(default)]
    pub used: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
}

/// Per-application access record on a user. At most one per `application_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationEntry {
    pub application_id: String,
    pub status: EntryStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub approved_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub rejected_at: Option<OffsetDateTime>,
    pub trial: Trial,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserMetadata {
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
    pub applications: Vec<ApplicationEntry>,
    pub trial: Option<Trial>,
    pub metadata: UserMetadata,
    #[serde(skip_serializing)]
    pub reset_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token_expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login_at: Option<OffsetDateTime>,
}

impl User {
    /// A fresh account with a generated id; `email` is stored lowercased.
    pub fn new(
        email: &str,
        display_name: impl Into<String>,
        password_hash: String,
        role: Role,
        status: UserStatus,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.trim().to_lowercase(),
            display_name: display_name.into(),
            password_hash,
            role,
            status,
            applications: Vec::new(),
            trial: None,
            metadata: UserMetadata::default(),
            reset_token: None,
            reset_token_expires_at: None,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }

    /// Replaces the entry with the same `application_id` in place, or appends.
    pub fn upsert_application(&mut self, entry: ApplicationEntry, now: OffsetDateTime) {
        match self
            .applications
            .iter_mut()
            .find(|e| e.application_id == entry.application_id)
        {
            Some(existing) => *existing = entry,
            None => self.applications.push(entry),
        }
        self.updated_at = now;
    }

    pub fn application(&self, application_id: &str) -> Option<&ApplicationEntry> {
        self.applications
            .iter()
            .find(|e| e.application_id == application_id)
    }
}

/// Fields an admin may change on an existing user.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub display_name: Option<String>,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    pub metadata: Option<UserMetadata>,
    pub trial: Option<Trial>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.role.is_none()
            && self.status.is_none()
            && self.metadata.is_none()
            && self.trial.is_none()
    }

    /// Names of the fields this patch touches, for event logs.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.display_name.is_some() {
            names.push("displayName");
        }
        if self.role.is_some() {
            names.push("role");
        }
        if self.status.is_some() {
            names.push("status");
        }
        if self.metadata.is_some() {
            names.push("metadata");
        }
        if self.trial.is_some() {
            names.push("trial");
        }
        names
    }

    pub fn apply(self, user: &mut User, now: OffsetDateTime) {
        if let Some(v) = self.display_name {
            user.display_name = v;
        }
        if let Some(v) = self.role {
            user.role = v;
        }
        if let Some(v) = self.status {
            user.status = v;
        }
        if let Some(v) = self.metadata {
            user.metadata = v;
        }
        if let Some(v) = self.trial {
            user.trial = Some(v);
        }
        user.updated_at = now;
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    pub limit: i64,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        self.role.map_or(true, |r| user.role == r) && self.status.map_or(true, |s| user.status == s)
    }
}
