use serde::Serialize;
use time::{Duration, OffsetDateTime};

use super::repo_types::{Trial, TrialType};
use crate::error::FieldError;

/// Longest time trial accepted, in days.
pub const MAX_TRIAL_DAYS: i64 = 36_500;

/// Bounds a trial `limit` arriving from a client: time trials run
/// 0..=`MAX_TRIAL_DAYS` days, count trials need a non-negative allowance.
pub fn check_limit(
    kind: TrialType,
    limit: Option<i64>,
    field: &'static str,
    errors: &mut Vec<FieldError>,
) {
    match (kind, limit) {
        (TrialType::Time, Some(days)) if !(0..=MAX_TRIAL_DAYS).contains(&days) => {
            errors.push(FieldError::new(
                field,
                format!("must be between 0 and {MAX_TRIAL_DAYS} days"),
            ));
        }
        (TrialType::Count, Some(n)) if n < 0 => {
            errors.push(FieldError::new(field, "must not be negative"));
        }
        _ => {}
    }
}

/// `start + days`, saturating at `MAX_TRIAL_DAYS` for limits stored before
/// they were bounded.
fn days_after(start: OffsetDateTime, days: i64) -> Option<OffsetDateTime> {
    start.checked_add(Duration::days(days.min(MAX_TRIAL_DAYS)))
}

text_enum! {
    pub enum TrialState {
        Active => "active",
        Expired => "expired",
        Unlimited => "unlimited",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialProgress {
    /// Share of the allowance already consumed, 0..=100.
    pub percentage: f64,
    /// Sessions (count trials) or whole days (time trials) left; `None` when unlimited.
    pub remaining: Option<i64>,
    pub status: TrialState,
}

impl TrialProgress {
    fn expired() -> Self {
        Self {
            percentage: 100.0,
            remaining: Some(0),
            status: TrialState::Expired,
        }
    }
}

impl Trial {
    /// Starts a fresh trial. Time trials measure `limit` in days.
    pub fn for_type(kind: TrialType, limit: Option<i64>, start: OffsetDateTime) -> Self {
        let end_date = match (kind, limit) {
            (TrialType::Time, Some(days)) if days > 0 => days_after(start, days),
            _ => None,
        };
        Self {
            kind,
            limit,
            used: 0,
            start_date: start,
            end_date,
        }
    }

    /// End of a time trial; entries provisioned without an explicit end fall
    /// back to `start + limit days`.
    pub fn effective_end(&self) -> Option<OffsetDateTime> {
        match (self.end_date, self.kind, self.limit) {
            (Some(end), _, _) => Some(end),
            (None, TrialType::Time, Some(days)) if days > 0 => days_after(self.start_date, days),
            _ => None,
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        match self.kind {
            TrialType::Unlimited => false,
            TrialType::Time => self.effective_end().map_or(true, |end| now >= end),
            TrialType::Count => match self.limit {
                Some(limit) if limit > 0 => self.used >= limit,
                _ => true,
            },
        }
    }

    pub fn progress(&self, now: OffsetDateTime) -> TrialProgress {
        if self.kind == TrialType::Unlimited {
            return TrialProgress {
                percentage: 100.0,
                remaining: None,
                status: TrialState::Unlimited,
            };
        }
        if self.is_expired(now) {
            return TrialProgress::expired();
        }
        match (self.kind, self.effective_end(), self.limit) {
            (TrialType::Time, Some(end), _) => {
                let total = (end - self.start_date).as_seconds_f64();
                let elapsed = (now - self.start_date).as_seconds_f64().max(0.0);
                let left = (end - now).as_seconds_f64();
                TrialProgress {
                    percentage: if total > 0.0 {
                        (elapsed / total * 100.0).min(100.0)
                    } else {
                        100.0
                    },
                    remaining: Some((left / 86_400.0).ceil() as i64),
                    status: TrialState::Active,
                }
            }
            (TrialType::Count, _, Some(limit)) => TrialProgress {
                percentage: self.used as f64 / limit as f64 * 100.0,
                remaining: Some(limit - self.used),
                status: TrialState::Active,
            },
            _ => TrialProgress::expired(),
        }
    }
}
