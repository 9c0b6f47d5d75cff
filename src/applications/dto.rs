use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{
    Application, ApplicationFilter, ApplicationPatch, ApplicationStatus, HealthCheck, HealthStatus,
    Platform, TrialDefaults,
};
use crate::{error::FieldError, users::trial::check_limit};

pub const MAX_LIST_LIMIT: i64 = 500;
const PLATFORM_MESSAGE: &str = "must be desktop, web or mobile";
const STATUS_MESSAGE: &str = "must be active, maintenance or inactive";

fn default_limit() -> i64 {
    100
}

fn parse_enum<T: std::str::FromStr>(
    raw: Option<&str>,
    field: &'static str,
    message: &'static str,
    errors: &mut Vec<FieldError>,
) -> Option<T> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    raw.parse()
        .map_err(|_| errors.push(FieldError::new(field, message)))
        .ok()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize)]
pub struct ListApplicationsQuery {
    pub status: Option<String>,
    pub platform: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

impl ListApplicationsQuery {
    pub fn into_filter(self) -> Result<ApplicationFilter, Vec<FieldError>> {
        let mut errors = Vec::new();
        let status = parse_enum(self.status.as_deref(), "status", STATUS_MESSAGE, &mut errors);
        let platform = parse_enum(self.platform.as_deref(), "platform", PLATFORM_MESSAGE, &mut errors);
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(ApplicationFilter {
            status,
            platform,
            limit: self.limit.clamp(1, MAX_LIST_LIMIT),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApplicationRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub platform: Option<String>,
    pub auth_required: Option<bool>,
    #[serde(alias = "maxConcurrentUsers")]
    pub max_users: Option<i64>,
    pub trial_defaults: Option<TrialDefaults>,
    pub status: Option<String>,
}

impl CreateApplicationRequest {
    /// Checks required fields and builds the stored document with defaults.
    pub fn into_application(self, now: OffsetDateTime) -> Result<Application, Vec<FieldError>> {
        let mut errors = Vec::new();
        let name = non_empty(self.name);
        if name.is_none() {
            errors.push(FieldError::new("name", "is required"));
        }
        let description = non_empty(self.description);
        if description.is_none() {
            errors.push(FieldError::new("description", "is required"));
        }
        let platform = match self.platform.as_deref().map(str::trim) {
            None | Some("") => {
                errors.push(FieldError::new("platform", "is required"));
                None
            }
            raw => parse_enum::<Platform>(raw, "platform", PLATFORM_MESSAGE, &mut errors),
        };
        let status = parse_enum(self.status.as_deref(), "status", STATUS_MESSAGE, &mut errors);
        if let Some(max) = self.max_users.filter(|m| *m < 0) {
            errors.push(FieldError::new("maxUsers", format!("must not be negative (got {max})")));
        }
        if let Some(defaults) = &self.trial_defaults {
            check_limit(defaults.kind, defaults.limit, "trialDefaults.limit", &mut errors);
        }

        let (Some(name), Some(description), Some(platform), true) =
            (name, description, platform, errors.is_empty())
        else {
            return Err(errors);
        };
        Ok(Application {
            id: Uuid::new_v4().to_string(),
            name,
            description,
            platform,
            auth_required: self.auth_required.unwrap_or(true),
            max_users: self.max_users.unwrap_or(50),
            current_users: 0,
            trial_defaults: self.trial_defaults.unwrap_or_default(),
            status: status.unwrap_or(ApplicationStatus::Active),
            health_check: HealthCheck {
                last_check: now,
                status: HealthStatus::Healthy,
            },
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateApplicationRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub platform: Option<String>,
    pub auth_required: Option<bool>,
    #[serde(alias = "maxConcurrentUsers")]
    pub max_users: Option<i64>,
    pub current_users: Option<i64>,
    pub trial_defaults: Option<TrialDefaults>,
    pub status: Option<String>,
    pub health_status: Option<String>,
}

impl UpdateApplicationRequest {
    pub fn into_patch(self, now: OffsetDateTime) -> Result<ApplicationPatch, Vec<FieldError>> {
        let mut errors = Vec::new();
        let name = match self.name.map(|n| n.trim().to_string()) {
            Some(n) if n.is_empty() => {
                errors.push(FieldError::new("name", "must not be empty"));
                None
            }
            other => other,
        };
        let platform = parse_enum(self.platform.as_deref(), "platform", PLATFORM_MESSAGE, &mut errors);
        let status = parse_enum(self.status.as_deref(), "status", STATUS_MESSAGE, &mut errors);
        let health: Option<HealthStatus> = parse_enum(
            self.health_status.as_deref(),
            "healthStatus",
            "must be healthy, warning or error",
            &mut errors,
        );
        for (field, value) in [("maxUsers", self.max_users), ("currentUsers", self.current_users)] {
            if value.is_some_and(|v| v < 0) {
                errors.push(FieldError::new(field, "must not be negative"));
            }
        }
        if let Some(defaults) = &self.trial_defaults {
            check_limit(defaults.kind, defaults.limit, "trialDefaults.limit", &mut errors);
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(ApplicationPatch {
            name,
            description: self.description.map(|d| d.trim().to_string()),
            platform,
            auth_required: self.auth_required,
            max_users: self.max_users,
            current_users: self.current_users,
            trial_defaults: self.trial_defaults,
            status,
            health_check: health.map(|status| HealthCheck {
                last_check: now,
                status,
            }),
        })
    }
}
