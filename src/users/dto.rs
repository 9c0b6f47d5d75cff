use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{
    repo_types::{Role, Trial, TrialType, User, UserFilter, UserMetadata, UserPatch, UserStatus},
    trial::{check_limit, TrialProgress},
};
use crate::{auth::services::is_valid_email, error::FieldError};

pub const MAX_LIST_LIMIT: i64 = 500;

fn default_limit() -> i64 {
    100
}

fn parse_field<T: std::str::FromStr>(
    raw: Option<&str>,
    field: &'static str,
    message: &'static str,
    errors: &mut Vec<FieldError>,
) -> Option<T> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            errors.push(FieldError::new(field, message));
            None
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

impl ListUsersQuery {
    pub fn into_filter(self) -> Result<UserFilter, Vec<FieldError>> {
        let mut errors = Vec::new();
        let role = parse_field(self.role.as_deref(), "role", "must be admin, moderator or user", &mut errors);
        let status = parse_field(
            self.status.as_deref(),
            "status",
            "must be active, suspended or inactive",
            &mut errors,
        );
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(UserFilter {
            role,
            status,
            limit: self.limit.clamp(1, MAX_LIST_LIMIT),
        })
    }
}

/// Trial as an admin sends it; dates are filled in server-side.
#[derive(Debug, Clone, Deserialize)]
pub struct TrialInput {
    #[serde(rename = "type")]
    pub kind: TrialType,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub used: i64,
}

impl TrialInput {
    fn check(&self, errors: &mut Vec<FieldError>) {
        check_limit(self.kind, self.limit, "trial.limit", errors);
    }

    pub fn into_trial(self, now: OffsetDateTime) -> Trial {
        let mut trial = Trial::for_type(self.kind, self.limit, now);
        trial.used = self.used.max(0);
        trial
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<UserMetadata>,
    pub trial: Option<TrialInput>,
}

/// A create request that passed validation.
#[derive(Debug)]
pub struct NewUser {
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub metadata: UserMetadata,
    pub trial: Option<TrialInput>,
}

impl CreateUserRequest {
    pub fn validate(self) -> Result<NewUser, Vec<FieldError>> {
        let mut errors = Vec::new();
        let email = self
            .email
            .map(|e| e.trim().to_lowercase())
            .unwrap_or_default();
        if !is_valid_email(&email) {
            errors.push(FieldError::new("email", "must be a valid email address"));
        }
        let display_name = self
            .display_name
            .map(|d| d.trim().to_string())
            .unwrap_or_default();
        if display_name.is_empty() {
            errors.push(FieldError::new("displayName", "is required"));
        }
        let role = match self.role.as_deref().map(str::trim) {
            None | Some("") => {
                errors.push(FieldError::new("role", "is required"));
                None
            }
            Some(raw) => parse_field(Some(raw), "role", "must be admin, moderator or user", &mut errors),
        };
        if let Some(trial) = &self.trial {
            trial.check(&mut errors);
        }
        match (role, errors.is_empty()) {
            (Some(role), true) => Ok(NewUser {
                email,
                display_name,
                role,
                metadata: self.metadata.unwrap_or_default(),
                trial: self.trial,
            }),
            _ => Err(errors),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub display_name: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
    pub metadata: Option<UserMetadata>,
    pub trial: Option<TrialInput>,
}

impl UpdateUserRequest {
    pub fn into_patch(self, now: OffsetDateTime) -> Result<UserPatch, Vec<FieldError>> {
        let mut errors = Vec::new();
        let display_name = match self.display_name.map(|d| d.trim().to_string()) {
            Some(d) if d.is_empty() => {
                errors.push(FieldError::new("displayName", "must not be empty"));
                None
            }
            other => other,
        };
        let role: Option<Role> =
            parse_field(self.role.as_deref(), "role", "must be admin, moderator or user", &mut errors);
        let status: Option<UserStatus> = parse_field(
            self.status.as_deref(),
            "status",
            "must be active, suspended or inactive",
            &mut errors,
        );
        if let Some(trial) = &self.trial {
            trial.check(&mut errors);
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(UserPatch {
            display_name,
            role,
            status,
            metadata: self.metadata,
            trial: self.trial.map(|t| t.into_trial(now)),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAdminRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub display_name: String,
}

/// Returned once, right after an admin creates an account.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedUser {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedAdmin {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedCount {
    pub deleted_count: u64,
}

/// A user with computed trial progress, for the dashboard.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    #[serde(flatten)]
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_progress: Option<TrialProgress>,
    /// Keyed by application id.
    pub application_progress: BTreeMap<String, TrialProgress>,
}

impl UserView {
    pub fn new(user: User, now: OffsetDateTime) -> Self {
        let trial_progress = user.trial.as_ref().map(|t| t.progress(now));
        let application_progress = user
            .applications
            .iter()
            .map(|e| (e.application_id.clone(), e.trial.progress(now)))
            .collect();
        Self {
            user,
            trial_progress,
            application_progress,
        }
    }
}
