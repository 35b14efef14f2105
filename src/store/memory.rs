//! In-memory collaborators backing the binary and the tests
//!
//! The event store, subscription store and directory can be loaded from JSON
//! files so the dispatcher can run against a snapshot exported from the
//! catalog.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    ChangeEventStore, EventPage, FailedEventRecord, FeedBroadcaster, FeedStore, MailEnvelope,
    MailTransport, RecipientDirectory, SubscriptionStore,
};
use crate::errors::{DispatchError, DispatchResult};
use crate::types::{ChangeEvent, EventSubscription, FeedThread, Recipient, StatusDetails, SubscriptionDestination};

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> DispatchResult<T> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        DispatchError::config(format!("Failed to parse {}: {}", path.display(), e))
    })
}

/// Change events held in offset order
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<ChangeEvent>>,
    fail_reads: AtomicBool,
}

impl InMemoryEventStore {
    /// Events without an offset are numbered after the highest one present
    pub fn new(events: Vec<ChangeEvent>) -> Self {
        Self {
            events: RwLock::new(sequence(Vec::new(), events)),
            fail_reads: AtomicBool::new(false),
        }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> DispatchResult<Self> {
        let events: Vec<ChangeEvent> = read_json(path.as_ref())?;
        info!(count = events.len(), path = %path.as_ref().display(), "Loaded change events");
        Ok(Self::new(events))
    }

    pub async fn append(&self, events: Vec<ChangeEvent>) {
        let mut guard = self.events.write().await;
        let existing = std::mem::take(&mut *guard);
        *guard = sequence(existing, events);
    }

    /// Make every read fail until switched back
    pub fn set_read_failure(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

/// Offsets stay strictly increasing in arrival order; an event whose offset is
/// missing or not past the previous one is renumbered
fn sequence(mut existing: Vec<ChangeEvent>, incoming: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
    let mut last = existing.last().map(|e| e.offset).unwrap_or(0);
    for mut event in incoming {
        if event.offset <= last {
            if event.offset != 0 {
                debug!(event_id = %event.id, offset = event.offset, assigned = last + 1, "Renumbered out-of-order event");
            }
            event.offset = last + 1;
        }
        last = event.offset;
        existing.push(event);
    }
    existing
}

#[async_trait]
impl ChangeEventStore for InMemoryEventStore {
    async fn list_change_events(&self, after_offset: u64, limit: usize) -> DispatchResult<EventPage> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DispatchError::read("event store unavailable"));
        }

        let events: Vec<ChangeEvent> = self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.offset > after_offset)
            .take(limit)
            .cloned()
            .collect();
        let next_offset = events.last().map(|e| e.offset).unwrap_or(after_offset);
        Ok(EventPage { events, next_offset })
    }
}

#[derive(Debug, Default)]
struct SubscriptionState {
    subscriptions: Vec<EventSubscription>,
    offsets: HashMap<Uuid, u64>,
    failed: HashMap<Uuid, Vec<FailedEventRecord>>,
}

/// Subscriptions plus everything the dispatcher writes back to them
#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    state: Mutex<SubscriptionState>,
}

impl InMemorySubscriptionStore {
    pub fn new(subscriptions: Vec<EventSubscription>) -> Self {
        Self {
            state: Mutex::new(SubscriptionState {
                subscriptions,
                ..Default::default()
            }),
        }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> DispatchResult<Self> {
        let subscriptions: Vec<EventSubscription> = read_json(path.as_ref())?;
        info!(count = subscriptions.len(), path = %path.as_ref().display(), "Loaded subscriptions");
        Ok(Self::new(subscriptions))
    }

    /// Replace a destination's settings, keeping its stored status
    pub async fn update_destination(&self, subscription_id: Uuid, destination: SubscriptionDestination) {
        let mut state = self.state.lock().await;
        let Some(subscription) = state.subscriptions.iter_mut().find(|s| s.id == subscription_id) else {
            return;
        };
        match subscription.destinations.iter_mut().find(|d| d.id == destination.id) {
            Some(existing) => {
                let status = existing.status_details.clone();
                *existing = destination;
                existing.status_details = status;
            }
            None => subscription.destinations.push(destination),
        }
    }

    pub async fn status_of(&self, destination_id: Uuid) -> Option<StatusDetails> {
        let state = self.state.lock().await;
        state
            .subscriptions
            .iter()
            .flat_map(|s| s.destinations.iter())
            .find(|d| d.id == destination_id)
            .map(|d| d.status_details.clone())
    }

    /// Every failure recorded for a subscription, in recording order per destination
    pub async fn recorded_failures(&self, subscription_id: Uuid) -> Vec<FailedEventRecord> {
        let state = self.state.lock().await;
        state.failed.get(&subscription_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn list_subscriptions(&self) -> DispatchResult<Vec<EventSubscription>> {
        Ok(self.state.lock().await.subscriptions.clone())
    }

    async fn get_enabled_destinations(&self, subscription_id: Uuid) -> DispatchResult<Vec<SubscriptionDestination>> {
        let state = self.state.lock().await;
        let subscription = state
            .subscriptions
            .iter()
            .find(|s| s.id == subscription_id)
            .ok_or_else(|| DispatchError::store(format!("Unknown subscription {}", subscription_id)))?;
        Ok(subscription
            .destinations
            .iter()
            .filter(|d| d.enabled)
            .cloned()
            .collect())
    }

    async fn persist_status(&self, destination_id: Uuid, status: &StatusDetails) -> DispatchResult<()> {
        let mut state = self.state.lock().await;
        let destination = state
            .subscriptions
            .iter_mut()
            .flat_map(|s| s.destinations.iter_mut())
            .find(|d| d.id == destination_id)
            .ok_or_else(|| DispatchError::store(format!("Unknown destination {}", destination_id)))?;
        destination.status_details = status.clone();
        debug!(destination_id = %destination_id, status = %status.status, "Persisted destination status");
        Ok(())
    }

    async fn load_offset(&self, subscription_id: Uuid) -> DispatchResult<u64> {
        Ok(self.state.lock().await.offsets.get(&subscription_id).copied().unwrap_or(0))
    }

    async fn store_offset(&self, subscription_id: Uuid, offset: u64) -> DispatchResult<()> {
        self.state.lock().await.offsets.insert(subscription_id, offset);
        Ok(())
    }

    async fn record_failed_event(&self, subscription_id: Uuid, record: FailedEventRecord) -> DispatchResult<()> {
        let mut state = self.state.lock().await;
        let records = state.failed.entry(subscription_id).or_default();
        records.retain(|r| !(r.destination_id == record.destination_id && r.event.id == record.event.id));
        records.push(record);
        Ok(())
    }

    async fn failed_events(&self, subscription_id: Uuid, destination_id: Uuid) -> DispatchResult<Vec<FailedEventRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .failed
            .get(&subscription_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.destination_id == destination_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove_failed_event(&self, subscription_id: Uuid, destination_id: Uuid, event_id: Uuid) -> DispatchResult<()> {
        let mut state = self.state.lock().await;
        if let Some(records) = state.failed.get_mut(&subscription_id) {
            records.retain(|r| !(r.destination_id == destination_id && r.event.id == event_id));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryFeedStore {
    threads: Mutex<Vec<FeedThread>>,
}

impl InMemoryFeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn threads(&self) -> Vec<FeedThread> {
        self.threads.lock().await.clone()
    }
}

#[async_trait]
impl FeedStore for InMemoryFeedStore {
    async fn create_thread(&self, thread: &FeedThread) -> DispatchResult<()> {
        self.threads.lock().await.push(thread.clone());
        Ok(())
    }
}

/// Broadcaster for deployments without a realtime hub: logs each thread
#[derive(Debug, Clone, Copy, Default)]
pub struct LogBroadcaster;

#[async_trait]
impl FeedBroadcaster for LogBroadcaster {
    async fn broadcast(&self, channel: &str, thread: &FeedThread) -> DispatchResult<()> {
        info!(
            channel,
            thread_id = %thread.id,
            about = %thread.about,
            "Broadcast activity feed thread"
        );
        Ok(())
    }
}

/// Directory snapshot as exported from the catalog
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorySnapshot {
    #[serde(default)]
    pub users: Vec<Recipient>,
    /// Team name to member names
    #[serde(default)]
    pub teams: HashMap<String, Vec<String>>,
    /// Names of admin users
    #[serde(default)]
    pub admins: Vec<String>,
    /// Entity id to follower names
    #[serde(default)]
    pub followers: HashMap<Uuid, Vec<String>>,
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    snapshot: DirectorySnapshot,
}

impl InMemoryDirectory {
    pub fn new(snapshot: DirectorySnapshot) -> Self {
        Self { snapshot }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> DispatchResult<Self> {
        let snapshot: DirectorySnapshot = read_json(path.as_ref())?;
        info!(
            users = snapshot.users.len(),
            teams = snapshot.teams.len(),
            "Loaded recipient directory"
        );
        Ok(Self::new(snapshot))
    }

    fn find(&self, name: &str) -> Option<&Recipient> {
        self.snapshot.users.iter().find(|u| u.name == name)
    }

    fn resolve_all<'a, I: IntoIterator<Item = &'a String>>(&self, names: I) -> Vec<Recipient> {
        names.into_iter().filter_map(|n| self.find(n)).cloned().collect()
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryDirectory {
    async fn user(&self, name: &str) -> DispatchResult<Option<Recipient>> {
        Ok(self.find(name).cloned())
    }

    async fn team_members(&self, team: &str) -> DispatchResult<Vec<Recipient>> {
        Ok(self
            .snapshot
            .teams
            .get(team)
            .map(|members| self.resolve_all(members))
            .unwrap_or_default())
    }

    async fn admins(&self) -> DispatchResult<Vec<Recipient>> {
        Ok(self.resolve_all(&self.snapshot.admins))
    }

    async fn followers_of(&self, entity_id: Uuid) -> DispatchResult<Vec<Recipient>> {
        Ok(self
            .snapshot
            .followers
            .get(&entity_id)
            .map(|names| self.resolve_all(names))
            .unwrap_or_default())
    }
}

/// Mail transport that keeps every message instead of sending it
#[derive(Debug, Default)]
pub struct InMemoryMailer {
    sent: Mutex<Vec<MailEnvelope>>,
    fail: AtomicBool,
}

impl InMemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failure(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<MailEnvelope> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl MailTransport for InMemoryMailer {
    async fn send(&self, mail: MailEnvelope) -> DispatchResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::store("mail relay refused the message"));
        }
        self.sent.lock().await.push(mail);
        Ok(())
    }
}
