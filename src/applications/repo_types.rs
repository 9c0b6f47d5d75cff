use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::users::repo_types::TrialType;

text_enum! {
    pub enum Platform {
        Desktop => "desktop",
        Web => "web",
        Mobile => "mobile",
    }
}

text_enum! {
    pub enum ApplicationStatus {
        Active => "active",
        Maintenance => "maintenance",
        Inactive => "inactive",
    }
}

text_enum! {
    pub enum HealthStatus {
        Healthy => "healthy",
        Warning => "warning",
        Error => "error",
    }
}

/// Template copied into a user's application entry when access is decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialDefaults {
    #[serde(rename = "type")]
    pub kind: TrialType,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl Default for TrialDefaults {
    fn default() -> Self {
        Self {
            kind: TrialType::Count,
            limit: Some(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    #[serde(with = "time::serde::rfc3339")]
    pub last_check: OffsetDateTime,
    pub status: HealthStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub name: String,
    pub description: String,
    pub platform: Platform,
    pub auth_required: bool,
    pub max_users: i64,
    pub current_users: i64,
    pub trial_defaults: TrialDefaults,
    pub status: ApplicationStatus,
    pub health_check: HealthCheck,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct ApplicationPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub platform: Option<Platform>,
    pub auth_required: Option<bool>,
    pub max_users: Option<i64>,
    pub current_users: Option<i64>,
    pub trial_defaults: Option<TrialDefaults>,
    pub status: Option<ApplicationStatus>,
    pub health_check: Option<HealthCheck>,
}

impl ApplicationPatch {
    pub fn field_names(&self) -> Vec<&'static str> {
        [
            ("name", self.name.is_some()),
            ("description", self.description.is_some()),
            ("platform", self.platform.is_some()),
            ("authRequired", self.auth_required.is_some()),
            ("maxUsers", self.max_users.is_some()),
            ("currentUsers", self.current_users.is_some()),
            ("trialDefaults", self.trial_defaults.is_some()),
            ("status", self.status.is_some()),
            ("healthCheck", self.health_check.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect()
    }

    pub fn apply(self, app: &mut Application, now: OffsetDateTime) {
        if let Some(v) = self.name {
            app.name = v;
        }
        if let Some(v) = self.description {
            app.description = v;
        }
        if let Some(v) = self.platform {
            app.platform = v;
        }
        if let Some(v) = self.auth_required {
            app.auth_required = v;
        }
        if let Some(v) = self.max_users {
            app.max_users = v;
        }
        if let Some(v) = self.current_users {
            app.current_users = v;
        }
        if let Some(v) = self.trial_defaults {
            app.trial_defaults = v;
        }
        if let Some(v) = self.status {
            app.status = v;
        }
        if let Some(v) = self.health_check {
            app.health_check = v;
        }
        app.updated_at = now;
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApplicationFilter {
    pub status: Option<ApplicationStatus>,
    pub platform: Option<Platform>,
    pub limit: i64,
}

impl ApplicationFilter {
    pub fn matches(&self, app: &Application) -> bool {
        self.status.map_or(true, |s| app.status == s)
            && self.platform.map_or(true, |p| app.platform == p)
    }
}
