use serde::Serialize;
use time::OffsetDateTime;

text_enum! {
    pub enum Counter {
        ApprovedRequests => "approvedRequests",
        RejectedRequests => "rejectedRequests",
    }
}

/// The single aggregate counters document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    pub approved_requests: i64,
    pub rejected_requests: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl Counters {
    pub fn bump(&mut self, counter: Counter, at: OffsetDateTime) {
        match counter {
            Counter::ApprovedRequests => self.approved_requests += 1,
            Counter::RejectedRequests => self.rejected_requests += 1,
        }
        self.updated_at = Some(at);
    }

    /// Approved share of all decided requests, in percent.
    pub fn approval_rate(&self) -> f64 {
        let decided = self.approved_requests + self.rejected_requests;
        if decided == 0 {
            0.0
        } else {
            self.approved_requests as f64 / decided as f64 * 100.0
        }
    }
}
