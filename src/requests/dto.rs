use serde::{Deserialize, Serialize};

use super::repo_types::RequestStatus;
use crate::{auth::services::is_valid_email, error::FieldError};

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 500;

/// Public submission. Every field is optional at the wire level so that
/// missing ones come back as field errors.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAccessRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    #[serde(alias = "companyName")]
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub phone: Option<String>,
    pub application_id: Option<String>,
    pub use_case: Option<String>,
}

/// A submission that passed validation, fields trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccessRequest {
    pub full_name: String,
    pub email: String,
    pub company: String,
    pub job_title: String,
    pub phone: Option<String>,
    pub application_id: String,
    pub use_case: String,
}

fn required(
    value: Option<String>,
    field: &'static str,
    errors: &mut Vec<FieldError>,
) -> String {
    let value = value.map(|v| v.trim().to_string()).unwrap_or_default();
    if value.is_empty() {
        errors.push(FieldError::new(field, "is required"));
    }
    value
}

impl SubmitAccessRequest {
    pub fn validate(self) -> Result<NewAccessRequest, Vec<FieldError>> {
        let mut errors = Vec::new();
        let full_name = required(self.full_name, "fullName", &mut errors);
        let email = required(self.email, "email", &mut errors);
        if !email.is_empty() && !is_valid_email(&email) {
            errors.push(FieldError::new("email", "must be a valid email address"));
        }
        let company = required(self.company, "company", &mut errors);
        let job_title = required(self.job_title, "jobTitle", &mut errors);
        let application_id = required(self.application_id, "applicationId", &mut errors);
        let use_case = required(self.use_case, "useCase", &mut errors);
        let phone = self
            .phone
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(NewAccessRequest {
            full_name,
            email,
            company,
            job_title,
            phone,
            application_id,
            use_case,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessRequestBody {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

impl ListQuery {
    pub fn parse(&self) -> Result<(Option<RequestStatus>, i64), Vec<FieldError>> {
        let status = match self.status.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                raw.parse::<RequestStatus>()
                    .map_err(|_| vec![FieldError::new("status", "must be pending, approved or rejected")])?,
            ),
            None => None,
        };
        let limit = self
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        Ok((status, limit))
    }
}

/// Result of approving or rejecting a request. `temporaryPassword` is only
/// present when an approval created the account.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub request_id: String,
    pub email: String,
    pub status: RequestStatus,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporary_password: Option<String>,
}
