//! Destinations: one configured delivery target of a subscription
//!
//! A destination renders an event for its kind, delivers it, and records the
//! outcome on its own [`StatusDetails`] before reporting a failure upward.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::errors::{DeliveryFailure, FailureKind};
use crate::types::{ChangeEvent, DestinationType, StatusDetails, SubscriptionDestination, SubscriptionStatus};

pub mod email;
pub mod factory;
pub mod feed;
pub mod status;
pub mod targets;
pub mod webhook;

pub use email::EmailDestination;
pub use factory::DestinationFactory;
pub use feed::{ACTIVITY_FEED_CHANNEL, ActivityFeedDestination};
pub use webhook::WebhookDestination;

#[async_trait]
pub trait Destination: Send + Sync {
    fn subscription_destination(&self) -> &SubscriptionDestination;

    fn subscription_destination_mut(&mut self) -> &mut SubscriptionDestination;

    /// Fixed delay before a transiently failed event may be retried
    fn retry_backoff(&self) -> Duration;

    /// Deliver one change event and record the outcome
    async fn send_message(&mut self, event: &ChangeEvent) -> Result<(), DeliveryFailure>;

    /// Deliver the kind's diagnostic message; failures are never requeued
    async fn send_test_message(&mut self) -> Result<(), DeliveryFailure>;

    /// Release transport resources; safe to call repeatedly
    fn close(&mut self);

    fn id(&self) -> Uuid {
        self.subscription_destination().id
    }

    fn destination_type(&self) -> DestinationType {
        self.subscription_destination().destination_type
    }

    fn enabled(&self) -> bool {
        self.subscription_destination().enabled
    }

    fn status_details(&self) -> &StatusDetails {
        &self.subscription_destination().status_details
    }

    fn set_success_status(&mut self, at: DateTime<Utc>) {
        status::mark_success(&mut self.subscription_destination_mut().status_details, at);
    }

    fn set_awaiting_retry(&mut self, at: DateTime<Utc>, status_code: Option<u16>, reason: String) {
        let backoff = self.retry_backoff();
        status::mark_awaiting_retry(
            &mut self.subscription_destination_mut().status_details,
            at,
            backoff,
            status_code,
            reason,
        );
    }

    fn set_error_status(&mut self, at: DateTime<Utc>, status_code: Option<u16>, reason: String) {
        status::mark_failed(
            &mut self.subscription_destination_mut().status_details,
            at,
            status_code,
            reason,
        );
    }

    /// Record a failed attempt and return the failure to raise
    ///
    /// `event` is `None` for test sends, which leaves the failure without a
    /// retryable (destination, event) pair.
    fn record_failure(&mut self, failure: DeliveryFailure, event: Option<&ChangeEvent>) -> DeliveryFailure {
        let now = Utc::now();
        match failure.kind {
            FailureKind::Transient => {
                self.set_awaiting_retry(now, failure.status_code, failure.message.clone())
            }
            FailureKind::UnknownHost => self.set_error_status(
                now,
                Some(status::UNKNOWN_HOST_STATUS_CODE),
                format!("{}: {}", status::UNKNOWN_HOST_REASON, failure.message),
            ),
            FailureKind::Permanent | FailureKind::Configuration => {
                self.set_error_status(now, failure.status_code, failure.message.clone())
            }
        }

        let details = self.status_details();
        tracing::warn!(
            destination_id = %self.id(),
            destination_type = %self.destination_type(),
            status = %details.status,
            status_code = ?details.last_failed_status_code,
            kind = %failure.kind,
            "Delivery failed: {}",
            failure.message
        );

        let mut failure = failure;
        if details.status == SubscriptionStatus::AwaitingRetry {
            failure.next_attempt = details.next_attempt;
        }
        if failure.kind == FailureKind::UnknownHost {
            failure.status_code = Some(status::UNKNOWN_HOST_STATUS_CODE);
        }
        match event {
            Some(event) => failure.for_event(self.id(), event),
            None => failure,
        }
    }
}
