//! Periodic driver of the consumers
//!
//! Each subscription has its own consumer behind a mutex. A tick starts a run
//! only when the previous run of that subscription has finished, so runs of
//! one subscription never overlap while different subscriptions proceed
//! independently.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, sleep};
use tracing::{error, info, warn};

use super::{EventConsumer, RunSummary, TestSendResults};
use crate::destination::DestinationFactory;
use crate::errors::DispatchResult;
use crate::store::{ChangeEventStore, SubscriptionStore};

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct DispatchScheduler {
    consumers: Vec<(String, Arc<Mutex<EventConsumer>>)>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl DispatchScheduler {
    pub fn new(consumers: Vec<EventConsumer>, interval: Duration) -> Self {
        let consumers = consumers
            .into_iter()
            .map(|consumer| (consumer.subscription().name.clone(), Arc::new(Mutex::new(consumer))))
            .collect();
        Self {
            consumers,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// One consumer per enabled subscription in the store
    pub async fn from_store(
        events: Arc<dyn ChangeEventStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        factory: Arc<DestinationFactory>,
    ) -> DispatchResult<Self> {
        let interval = factory.config().poll_interval;
        let consumers: Vec<EventConsumer> = subscriptions
            .list_subscriptions()
            .await?
            .into_iter()
            .filter(|s| s.enabled)
            .map(|s| {
                EventConsumer::new(
                    s,
                    Arc::clone(&events),
                    Arc::clone(&subscriptions),
                    Arc::clone(&factory),
                )
            })
            .collect();
        info!(subscriptions = consumers.len(), "Scheduler ready");
        Ok(Self::new(consumers, interval))
    }

    /// Flag checked between ticks; setting it stops the scheduler after in-flight runs finish
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn subscription_names(&self) -> impl Iterator<Item = &str> {
        self.consumers.iter().map(|(name, _)| name.as_str())
    }

    /// Start a run for every subscription that is not still busy
    pub fn tick(&self) -> Vec<JoinHandle<()>> {
        let mut started = Vec::new();
        for (name, consumer) in &self.consumers {
            match Arc::clone(consumer).try_lock_owned() {
                Ok(mut guard) => {
                    let name = name.clone();
                    started.push(tokio::spawn(async move {
                        if let Err(e) = guard.run_once().await {
                            error!(subscription = %name, "Consumer run failed: {}", e);
                        }
                    }));
                }
                Err(_) => warn!(subscription = %name, "Previous run still in progress, skipping tick"),
            }
        }
        started
    }

    /// Run every subscription once, one after another
    pub async fn run_all_once(&self) -> Vec<(String, DispatchResult<RunSummary>)> {
        let mut results = Vec::new();
        for (name, consumer) in &self.consumers {
            let result = consumer.lock().await.run_once().await;
            results.push((name.clone(), result));
        }
        results
    }

    /// Send test messages for one subscription
    pub async fn send_test_messages(&self, subscription: &str) -> Option<DispatchResult<TestSendResults>> {
        let (_, consumer) = self.consumers.iter().find(|(name, _)| name == subscription)?;
        Some(consumer.lock().await.send_test_messages().await)
    }

    /// Tick until shutdown is signalled, then wait for in-flight runs and close destinations
    pub async fn run(&self) {
        info!(interval = ?self.interval, "Starting dispatch scheduler");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown_requested() => break,
            }
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.tick();
        }

        info!("Shutdown signal received, waiting for in-flight runs");
        for (_, consumer) in &self.consumers {
            consumer.lock().await.close().await;
        }
        info!("Scheduler stopped");
    }

    async fn shutdown_requested(&self) {
        while !self.shutdown.load(Ordering::SeqCst) {
            sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }
}
