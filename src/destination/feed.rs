//! Activity feed destination: posts change lines as conversation threads

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use super::Destination;
use crate::config::DispatchConfig;
use crate::errors::{DeliveryFailure, DispatchError, DispatchResult, FailureKind};
use crate::formatter::feed::entity_link;
use crate::formatter::{FeedFormatter, FormatContext, MessageFormatter};
use crate::store::{FeedBroadcaster, FeedStore};
use crate::types::{ChangeEvent, DestinationType, EventSubscription, FeedThread, SubscriptionDestination};

/// Realtime channel new threads are announced on
pub const ACTIVITY_FEED_CHANNEL: &str = "activityFeed";

pub struct ActivityFeedDestination {
    subscription: Arc<EventSubscription>,
    destination: SubscriptionDestination,
    store: Arc<dyn FeedStore>,
    broadcaster: Arc<dyn FeedBroadcaster>,
    base_url: String,
    retry_backoff: Duration,
    closed: bool,
}

impl ActivityFeedDestination {
    pub fn new(
        subscription: Arc<EventSubscription>,
        destination: SubscriptionDestination,
        config: &DispatchConfig,
        store: Arc<dyn FeedStore>,
        broadcaster: Arc<dyn FeedBroadcaster>,
    ) -> DispatchResult<Self> {
        if destination.destination_type != DestinationType::ActivityFeed {
            return Err(DispatchError::config(format!(
                "Destination {} is {} but was configured as ACTIVITY_FEED",
                destination.id, destination.destination_type
            )));
        }
        Ok(Self {
            subscription,
            destination,
            store,
            broadcaster,
            base_url: config.catalog_base_url.clone(),
            retry_backoff: config.retry_backoff,
            closed: false,
        })
    }

    fn failure(&self, kind: FailureKind, message: String) -> DeliveryFailure {
        DeliveryFailure::new(DestinationType::ActivityFeed, kind, message)
    }

    async fn post(&self, event: &ChangeEvent, lines: Vec<String>) -> Result<usize, DeliveryFailure> {
        let about = entity_link(event);
        let mut posted = 0;
        for message in lines {
            let thread = FeedThread {
                id: Uuid::new_v4(),
                about: about.clone(),
                entity_type: event.entity_type.clone(),
                entity_id: event.entity_id,
                message,
                created_by: event.user_name.clone(),
                created_at: Utc::now(),
            };
            self.store
                .create_thread(&thread)
                .await
                .map_err(|e| self.failure(FailureKind::Transient, format!("Failed to create thread: {}", e)))?;
            self.broadcaster
                .broadcast(ACTIVITY_FEED_CHANNEL, &thread)
                .await
                .map_err(|e| self.failure(FailureKind::Transient, format!("Failed to broadcast thread: {}", e)))?;
            posted += 1;
        }
        Ok(posted)
    }
}

#[async_trait]
impl Destination for ActivityFeedDestination {
    fn subscription_destination(&self) -> &SubscriptionDestination {
        &self.destination
    }

    fn subscription_destination_mut(&mut self) -> &mut SubscriptionDestination {
        &mut self.destination
    }

    fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }

    async fn send_message(&mut self, event: &ChangeEvent) -> Result<(), DeliveryFailure> {
        // threads announce themselves; reacting to them would loop
        if event.is_thread() {
            return Ok(());
        }
        if self.closed {
            let failure = self.failure(FailureKind::Configuration, "destination is closed".to_string());
            return Err(self.record_failure(failure, Some(event)));
        }

        let subscription = Arc::clone(&self.subscription);
        let ctx = FormatContext {
            publisher_name: subscription.publisher_name(),
            base_url: &self.base_url,
        };
        let outcome = match FeedFormatter.build_entity_message(&ctx, event) {
            Ok(lines) if lines.is_empty() => {
                debug!(event_id = %event.id, "Nothing to post to the activity feed");
                Ok(0)
            }
            Ok(lines) => self.post(event, lines).await,
            Err(e) => Err(self.failure(FailureKind::Permanent, e.to_string())),
        };

        match outcome {
            Ok(posted) => {
                debug!(event_id = %event.id, threads = posted, "Activity feed updated");
                self.set_success_status(Utc::now());
                Ok(())
            }
            Err(failure) => Err(self.record_failure(failure, Some(event))),
        }
    }

    async fn send_test_message(&mut self) -> Result<(), DeliveryFailure> {
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
