//! alert-relay: delivery of catalog change events to subscription destinations
//!
//! Change events are polled from an event store, filtered per subscription
//! and fanned out to webhook-style endpoints (generic, Slack, Microsoft
//! Teams, Google Chat), email and the in-app activity feed. Every destination
//! tracks its own delivery status and failed events are retried once after a
//! fixed backoff.

pub mod config;
pub mod consumer;
pub mod destination;
pub mod email_config;
pub mod errors;
pub mod filter;
pub mod formatter;
pub mod signature;
pub mod store;
pub mod tracing_context;
pub mod types;

pub use config::DispatchConfig;
pub use consumer::{DispatchScheduler, EventConsumer, RunSummary, TargetedEvent};
pub use destination::{Destination, DestinationFactory};
pub use errors::{DeliveryFailure, DispatchError, DispatchResult, FailureKind};
