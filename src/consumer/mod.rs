//! Event consumer: polls change events for one subscription and fans them out
//!
//! A run refreshes the subscription's destinations, retries due failures,
//! reads the next page of events after the committed offset, delivers them,
//! records what failed and finally commits statuses and the new offset.
//! Nothing is committed when the read fails, so a crash or an aborted run
//! re-delivers the same page next time.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::destination::{Destination, DestinationFactory, status};
use crate::errors::{DeliveryFailure, DispatchResult};
use crate::filter::should_dispatch;
use crate::store::{ChangeEventStore, EventPage, FailedEventRecord, SubscriptionStore};
use crate::tracing_context::RunContext;
use crate::types::{ChangeEvent, EventSubscription, StatusDetails, SubscriptionDestination};

pub mod scheduler;

pub use scheduler::DispatchScheduler;

/// A destination shared between delivery tasks; the lock serializes its status writes
pub type SharedDestination = Arc<Mutex<Box<dyn Destination>>>;

/// Per-destination outcome of a diagnostic send
pub type TestSendResults = Vec<(Uuid, Result<(), DeliveryFailure>)>;

/// One event and the destinations it should reach
#[derive(Debug, Clone, PartialEq)]
pub struct TargetedEvent {
    pub event: ChangeEvent,
    pub destinations: BTreeSet<Uuid>,
}

/// What one run did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub correlation_id: String,
    pub fetched: usize,
    pub dispatched: usize,
    pub retried: usize,
    pub failed: usize,
    pub committed_offset: u64,
}

struct DestinationSlot {
    settings: SubscriptionDestination,
    /// `None` while the settings cannot be turned into a destination
    handle: Option<SharedDestination>,
}

pub struct EventConsumer {
    subscription: Arc<EventSubscription>,
    events: Arc<dyn ChangeEventStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    factory: Arc<DestinationFactory>,
    batch_size: usize,
    slots: BTreeMap<Uuid, DestinationSlot>,
}

impl EventConsumer {
    pub fn new(
        subscription: EventSubscription,
        events: Arc<dyn ChangeEventStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        factory: Arc<DestinationFactory>,
    ) -> Self {
        let batch_size = subscription
            .batch_size
            .filter(|size| *size > 0)
            .unwrap_or(factory.config().batch_size);
        Self {
            subscription: Arc::new(subscription),
            events,
            subscriptions,
            factory,
            batch_size,
            slots: BTreeMap::new(),
        }
    }

    pub fn subscription(&self) -> &EventSubscription {
        &self.subscription
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Up to `batch_size` events after `offset`, in offset order
    pub async fn poll_events(&self, offset: u64, batch_size: usize) -> DispatchResult<EventPage> {
        let page = self.events.list_change_events(offset, batch_size).await?;
        debug!(offset, fetched = page.events.len(), next_offset = page.next_offset, "Polled change events");
        Ok(page)
    }

    /// Sync destinations with the store, rebuilding only those whose settings changed
    ///
    /// A destination that cannot be built is marked FAILED and receives nothing
    /// until its settings change again.
    pub async fn refresh_destinations(&mut self) -> DispatchResult<()> {
        let current = self
            .subscriptions
            .get_enabled_destinations(self.subscription.id)
            .await?;

        let wanted: HashSet<Uuid> = current.iter().map(|d| d.id).collect();
        let stale: Vec<Uuid> = self.slots.keys().filter(|id| !wanted.contains(id)).copied().collect();
        for id in stale {
            if let Some(handle) = self.slots.remove(&id).and_then(|slot| slot.handle) {
                handle.lock().await.close();
            }
            info!(destination_id = %id, "Destination removed or disabled");
        }

        for settings in current {
            if let Some(slot) = self.slots.get(&settings.id) {
                if slot.settings.same_settings(&settings) {
                    continue;
                }
            }
            if let Some(old) = self.slots.remove(&settings.id).and_then(|slot| slot.handle) {
                old.lock().await.close();
            }

            let handle = match self.factory.create(Arc::clone(&self.subscription), settings.clone()) {
                Ok(destination) => Some(Arc::new(Mutex::new(destination))),
                Err(e) => {
                    error!(
                        destination_id = %settings.id,
                        destination_type = %settings.destination_type,
                        "Destination cannot be built, skipping it until reconfigured: {}",
                        e
                    );
                    let mut status_details = settings.status_details.clone();
                    status::mark_failed(&mut status_details, Utc::now(), None, e.to_string());
                    self.subscriptions.persist_status(settings.id, &status_details).await?;
                    None
                }
            };
            self.slots.insert(settings.id, DestinationSlot { settings, handle });
        }
        Ok(())
    }

    /// Pair each event that passes the subscription filter with the usable destinations
    pub fn route(&self, events: Vec<ChangeEvent>) -> Vec<TargetedEvent> {
        let destinations: BTreeSet<Uuid> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.handle.is_some() && slot.settings.enabled)
            .map(|(id, _)| *id)
            .collect();
        if destinations.is_empty() {
            return Vec::new();
        }

        events
            .into_iter()
            .filter(|event| should_dispatch(self.subscription.filtering_rules.as_ref(), event))
            .map(|event| TargetedEvent {
                event,
                destinations: destinations.clone(),
            })
            .collect()
    }

    /// Deliver a batch; one task per destination, events in offset order within each
    ///
    /// Returns every failure raised. A failing destination never stops the others.
    pub async fn publish_events(&self, mut batch: Vec<TargetedEvent>) -> Vec<DeliveryFailure> {
        batch.sort_by_key(|targeted| targeted.event.offset);

        let mut streams: BTreeMap<Uuid, Vec<ChangeEvent>> = BTreeMap::new();
        for targeted in batch {
            for id in &targeted.destinations {
                streams.entry(*id).or_default().push(targeted.event.clone());
            }
        }

        let mut tasks = JoinSet::new();
        for (id, events) in streams {
            let Some(handle) = self.slots.get(&id).and_then(|slot| slot.handle.clone()) else {
                warn!(destination_id = %id, "No usable destination, skipping its events");
                continue;
            };
            let span = tracing::info_span!("destination_delivery", destination_id = %id, events = events.len());
            tasks.spawn(deliver_stream(handle, events).instrument(span));
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(mut stream_failures) => failures.append(&mut stream_failures),
                Err(e) => error!("Delivery task failed: {}", e),
            }
        }
        failures
    }

    /// Record a failed (destination, event) pair for inspection and retry
    pub async fn handle_failed_event(&self, failure: DeliveryFailure) -> DispatchResult<()> {
        let Some(failed) = failure.failed_event.clone() else {
            warn!("Delivery failure without an event, nothing to record: {}", failure);
            return Ok(());
        };

        error!(
            subscription = %self.subscription.name,
            destination_id = %failed.destination_id,
            event_id = %failed.event.id,
            offset = failed.event.offset,
            retry_at = ?failure.next_attempt,
            "{}",
            failure
        );

        self.subscriptions
            .record_failed_event(
                self.subscription.id,
                FailedEventRecord {
                    destination_id: failed.destination_id,
                    event: failed.event,
                    reason: failure.message,
                    status_code: failure.status_code,
                    next_attempt: failure.next_attempt,
                    failed_at: Utc::now(),
                },
            )
            .await
    }

    /// Persist every destination's status, then advance the durable offset
    pub async fn commit(&self, offset: u64) -> DispatchResult<()> {
        self.persist_statuses().await?;
        self.subscriptions.store_offset(self.subscription.id, offset).await?;
        debug!(offset, "Committed offset");
        Ok(())
    }

    /// Re-send recorded failures whose retry time has passed; each gets one retry
    pub async fn retry_failed_events(&self) -> DispatchResult<(usize, Vec<DeliveryFailure>)> {
        let now = Utc::now();
        let mut retried = 0;
        let mut failures = Vec::new();

        for (id, slot) in &self.slots {
            let Some(handle) = &slot.handle else {
                continue;
            };
            let mut due: Vec<FailedEventRecord> = self
                .subscriptions
                .failed_events(self.subscription.id, *id)
                .await?
                .into_iter()
                .filter(|record| record.is_due(now))
                .collect();
            if due.is_empty() {
                continue;
            }
            due.sort_by_key(|record| record.event.offset);

            let mut destination = handle.lock().await;
            for record in due {
                retried += 1;
                self.subscriptions
                    .remove_failed_event(self.subscription.id, *id, record.event.id)
                    .await?;
                match destination.send_message(&record.event).await {
                    Ok(()) => info!(destination_id = %id, event_id = %record.event.id, "Retry succeeded"),
                    Err(mut failure) => {
                        if failure.kind.is_retryable() {
                            destination.set_error_status(
                                Utc::now(),
                                failure.status_code,
                                format!("Retry exhausted: {}", failure.message),
                            );
                        }
                        failure.next_attempt = None;
                        failures.push(failure);
                    }
                }
            }
        }
        Ok((retried, failures))
    }

    /// One complete poll cycle
    pub async fn run_once(&mut self) -> DispatchResult<RunSummary> {
        let context = RunContext::new(&self.subscription.name);
        let span = context.span.clone();
        self.run_cycle(context.correlation_id.to_string())
            .instrument(span)
            .await
    }

    async fn run_cycle(&mut self, correlation_id: String) -> DispatchResult<RunSummary> {
        self.refresh_destinations().await?;

        let (retried, retry_failures) = self.retry_failed_events().await?;
        let mut failed = retry_failures.len();
        for failure in retry_failures {
            self.handle_failed_event(failure).await?;
        }

        let offset = self.subscriptions.load_offset(self.subscription.id).await?;
        let page = match self.poll_events(offset, self.batch_size).await {
            Ok(page) => page,
            Err(e) => {
                error!(offset, "Event store read failed, offset not advanced: {}", e);
                self.persist_statuses().await?;
                return Err(e);
            }
        };

        let fetched = page.events.len();
        let batch = self.route(page.events);
        let dispatched = batch.len();
        let failures = self.publish_events(batch).await;
        failed += failures.len();
        for failure in failures {
            self.handle_failed_event(failure).await?;
        }

        self.commit(page.next_offset).await?;
        info!(
            fetched,
            dispatched,
            retried,
            failed,
            offset = page.next_offset,
            "Consumer run complete"
        );

        Ok(RunSummary {
            correlation_id,
            fetched,
            dispatched,
            retried,
            failed,
            committed_offset: page.next_offset,
        })
    }

    /// Send every destination its diagnostic message
    pub async fn send_test_messages(&mut self) -> DispatchResult<TestSendResults> {
        self.refresh_destinations().await?;
        let mut results = Vec::new();
        for (id, slot) in &self.slots {
            let Some(handle) = &slot.handle else {
                continue;
            };
            let outcome = handle.lock().await.send_test_message().await;
            results.push((*id, outcome));
        }
        self.persist_statuses().await?;
        Ok(results)
    }

    /// Current in-memory status of a destination
    pub async fn destination_status(&self, destination_id: Uuid) -> Option<StatusDetails> {
        let slot = self.slots.get(&destination_id)?;
        match &slot.handle {
            Some(handle) => Some(handle.lock().await.status_details().clone()),
            None => None,
        }
    }

    pub async fn close(&mut self) {
        for slot in self.slots.values() {
            if let Some(handle) = &slot.handle {
                handle.lock().await.close();
            }
        }
    }

    async fn persist_statuses(&self) -> DispatchResult<()> {
        for (id, slot) in &self.slots {
            if let Some(handle) = &slot.handle {
                let status_details = handle.lock().await.status_details().clone();
                self.subscriptions.persist_status(*id, &status_details).await?;
            }
        }
        Ok(())
    }
}

async fn deliver_stream(handle: SharedDestination, events: Vec<ChangeEvent>) -> Vec<DeliveryFailure> {
    let mut destination = handle.lock().await;
    let mut failures = Vec::new();
    for event in &events {
        if let Err(failure) = destination.send_message(event).await {
            failures.push(failure);
        }
    }
    failures
}
