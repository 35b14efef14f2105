//! Collaborator seams of the dispatcher
//!
//! The dispatcher never talks to a database, SMTP server or websocket hub
//! directly. Everything it reads or writes outside of HTTP goes through the
//! traits below, injected at construction time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DispatchResult;
use crate::filter::entity_owner_names;
use crate::types::{ChangeEvent, EventSubscription, FeedThread, Recipient, StatusDetails, SubscriptionDestination};

pub mod memory;
pub mod smtp;

pub use memory::{
    DirectorySnapshot, InMemoryDirectory, InMemoryEventStore, InMemoryFeedStore, InMemoryMailer,
    InMemorySubscriptionStore, LogBroadcaster,
};
pub use smtp::SmtpMailer;

/// One page of the change-event feed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPage {
    /// Events with an offset greater than the requested one, in offset order
    pub events: Vec<ChangeEvent>,
    /// Offset to commit once the page has been handled
    pub next_offset: u64,
}

/// Ordered, paginated feed of change events
#[async_trait]
pub trait ChangeEventStore: Send + Sync {
    async fn list_change_events(&self, after_offset: u64, limit: usize) -> DispatchResult<EventPage>;
}

/// A (destination, event) pair that failed delivery, kept for inspection and retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedEventRecord {
    pub destination_id: Uuid,
    pub event: ChangeEvent,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// `None` once the retry has been used up or the failure was permanent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt: Option<DateTime<Utc>>,
    pub failed_at: DateTime<Utc>,
}

impl FailedEventRecord {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt.map(|at| at <= now).unwrap_or(false)
    }
}

/// Subscription configuration, destination status and consumer checkpoints
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn list_subscriptions(&self) -> DispatchResult<Vec<EventSubscription>>;

    async fn get_enabled_destinations(&self, subscription_id: Uuid) -> DispatchResult<Vec<SubscriptionDestination>>;

    async fn persist_status(&self, destination_id: Uuid, status: &StatusDetails) -> DispatchResult<()>;

    /// Durable offset of a subscription; zero before the first commit
    async fn load_offset(&self, subscription_id: Uuid) -> DispatchResult<u64>;

    async fn store_offset(&self, subscription_id: Uuid, offset: u64) -> DispatchResult<()>;

    async fn record_failed_event(&self, subscription_id: Uuid, record: FailedEventRecord) -> DispatchResult<()>;

    async fn failed_events(&self, subscription_id: Uuid, destination_id: Uuid) -> DispatchResult<Vec<FailedEventRecord>>;

    async fn remove_failed_event(&self, subscription_id: Uuid, destination_id: Uuid, event_id: Uuid) -> DispatchResult<()>;
}

/// Where activity-feed threads are stored
#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn create_thread(&self, thread: &FeedThread) -> DispatchResult<()>;
}

/// Realtime push of new threads to connected viewers
#[async_trait]
pub trait FeedBroadcaster: Send + Sync {
    async fn broadcast(&self, channel: &str, thread: &FeedThread) -> DispatchResult<()>;
}

/// Lookup of users and teams that can be notified
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// A user by name
    async fn user(&self, name: &str) -> DispatchResult<Option<Recipient>>;

    /// Members of a team; an unknown team has none
    async fn team_members(&self, team: &str) -> DispatchResult<Vec<Recipient>>;

    async fn admins(&self) -> DispatchResult<Vec<Recipient>>;

    async fn followers_of(&self, entity_id: Uuid) -> DispatchResult<Vec<Recipient>>;

    /// Owners named in the entity snapshot; teams expand to their members
    async fn owners_of(&self, event: &ChangeEvent) -> DispatchResult<Vec<Recipient>> {
        let mut owners = Vec::new();
        for name in entity_owner_names(event) {
            owners.extend(self.user_or_team(&name).await?);
        }
        Ok(owners)
    }

    /// A user by name, or else the members of a team of that name
    async fn user_or_team(&self, name: &str) -> DispatchResult<Vec<Recipient>> {
        match self.user(name).await? {
            Some(user) => Ok(vec![user]),
            None => self.team_members(name).await,
        }
    }
}

/// A rendered email ready for the transport
#[derive(Debug, Clone, PartialEq)]
pub struct MailEnvelope {
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: MailEnvelope) -> DispatchResult<()>;
}
