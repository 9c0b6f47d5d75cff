use serde::Serialize;
use time::OffsetDateTime;

text_enum! {
    pub enum RequestStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub company: String,
    pub job_title: String,
    pub phone: Option<String>,
    pub application_id: String,
    pub use_case: String,
    pub status: RequestStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processed_at: Option<OffsetDateTime>,
    pub processed_by: Option<String>,
    pub notes: Option<String>,
    pub user_id: Option<String>,
}

/// Terminal outcome written onto a pending request in one conditional update.
/// `user_id` is usually filled in afterwards, once the account exists.
#[derive(Debug, Clone)]
pub struct Decision {
    pub status: RequestStatus,
    pub processed_at: OffsetDateTime,
    pub processed_by: String,
    pub notes: Option<String>,
    pub user_id: Option<String>,
}

impl Decision {
    pub fn apply(&self, request: &mut AccessRequest) {
        request.status = self.status;
        request.processed_at = Some(self.processed_at);
        request.processed_by = Some(self.processed_by.clone());
        request.notes = self.notes.clone();
        request.user_id = self.user_id.clone();
    }
}
