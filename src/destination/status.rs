//! Delivery status transitions
//!
//! ACTIVE -> AWAITING_RETRY on a transient failure, -> FAILED on a permanent
//! one. Any success returns the destination to ACTIVE and clears the failure
//! bookkeeping.

use chrono::{DateTime, Duration, Utc};

use crate::types::{StatusDetails, SubscriptionStatus};

/// Status code recorded when the endpoint host cannot be resolved
pub const UNKNOWN_HOST_STATUS_CODE: u16 = 400;
pub const UNKNOWN_HOST_REASON: &str = "UnknownHostException";

pub fn mark_success(details: &mut StatusDetails, at: DateTime<Utc>) {
    *details = StatusDetails {
        status: SubscriptionStatus::Active,
        last_successful_at: Some(at),
        last_failed_at: None,
        last_failed_status_code: None,
        last_failed_reason: None,
        next_attempt: None,
        timestamp: Some(at),
    };
}

pub fn mark_awaiting_retry(
    details: &mut StatusDetails,
    at: DateTime<Utc>,
    backoff: Duration,
    status_code: Option<u16>,
    reason: String,
) {
    details.status = SubscriptionStatus::AwaitingRetry;
    details.last_failed_at = Some(at);
    details.last_failed_status_code = status_code;
    details.last_failed_reason = Some(reason);
    details.next_attempt = Some(at + backoff);
    details.timestamp = Some(at);
}

/// No retry is scheduled; requeueing is up to the consumer
pub fn mark_failed(details: &mut StatusDetails, at: DateTime<Utc>, status_code: Option<u16>, reason: String) {
    details.status = SubscriptionStatus::Failed;
    details.last_failed_at = Some(at);
    details.last_failed_status_code = status_code;
    details.last_failed_reason = Some(reason);
    details.next_attempt = None;
    details.timestamp = Some(at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_awaiting_retry_schedules_next_attempt() {
        let mut details = StatusDetails::default();
        mark_awaiting_retry(&mut details, at(), Duration::seconds(10), Some(503), "unavailable".to_string());

        assert_eq!(details.status, SubscriptionStatus::AwaitingRetry);
        assert_eq!(details.next_attempt, Some(at() + Duration::seconds(10)));
        assert_eq!(details.last_failed_status_code, Some(503));
        assert_eq!(details.timestamp, Some(at()));
    }

    #[test]
    fn test_failed_clears_next_attempt() {
        let mut details = StatusDetails::default();
        mark_awaiting_retry(&mut details, at(), Duration::seconds(10), None, "timeout".to_string());
        mark_failed(&mut details, at(), Some(404), "not found".to_string());

        assert_eq!(details.status, SubscriptionStatus::Failed);
        assert!(details.next_attempt.is_none());
        assert_eq!(details.last_failed_reason.as_deref(), Some("not found"));
    }

    #[test]
    fn test_success_recovers_from_failed() {
        let mut details = StatusDetails::default();
        mark_failed(&mut details, at(), Some(500), "boom".to_string());
        let later = at() + Duration::minutes(1);
        mark_success(&mut details, later);

        assert_eq!(details.status, SubscriptionStatus::Active);
        assert_eq!(details.last_successful_at, Some(later));
        assert!(details.last_failed_reason.is_none());
        assert!(details.last_failed_status_code.is_none());
        assert!(details.next_attempt.is_none());
    }
}
