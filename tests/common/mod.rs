//! Shared fixtures for the integration tests
//!
//! Builds change events, subscriptions and destinations, and provides a
//! wiremock responder that records every request it answers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use alert_relay::config::DispatchConfig;
use alert_relay::consumer::EventConsumer;
use alert_relay::destination::DestinationFactory;
use alert_relay::store::{InMemoryDirectory, InMemoryEventStore, InMemoryFeedStore, InMemorySubscriptionStore, LogBroadcaster};
use alert_relay::types::{
    ChangeDescription, ChangeEvent, EventSubscription, EventType, FieldChange, SubscriptionDestination,
};
use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;
use wiremock::{Request, Respond, ResponseTemplate};

pub const SECRET: &str = "abc";

/// A request seen by the mock server
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl CapturedRequest {
    pub fn body_json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    /// Header value by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Records requests; answers 200 unless the body contains the failure marker
#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    status: u16,
    fail_on: Option<(String, u16)>,
}

impl CaptureResponder {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            status,
            fail_on: None,
        }
    }

    /// Answer `status` to any request whose body contains `marker`
    pub fn failing_on(marker: &str, status: u16) -> Self {
        Self {
            fail_on: Some((marker.to_string(), status)),
            ..Self::new()
        }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let captured = CapturedRequest {
            method: request.method.to_string(),
            path: request.url.path().to_string(),
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
        };
        let body = String::from_utf8_lossy(&captured.body).to_string();
        self.requests.lock().unwrap().push(captured);

        match &self.fail_on {
            Some((marker, status)) if body.contains(marker.as_str()) => ResponseTemplate::new(*status),
            _ => ResponseTemplate::new(self.status),
        }
    }
}

/// A table update event with one description diff
pub fn table_event(fqn: &str) -> ChangeEvent {
    ChangeEvent {
        id: Uuid::new_v4(),
        offset: 0,
        event_type: EventType::EntityUpdated,
        entity_type: "table".to_string(),
        entity_id: Uuid::new_v4(),
        entity_fully_qualified_name: fqn.to_string(),
        user_name: "alice".to_string(),
        timestamp: Utc::now(),
        previous_version: Some(0.1),
        current_version: Some(0.2),
        change_description: Some(ChangeDescription {
            fields_updated: vec![FieldChange {
                name: "description".to_string(),
                old_value: Some(json!("before")),
                new_value: Some(json!("after")),
            }],
            ..Default::default()
        }),
        entity: None,
    }
}

pub fn destination(kind: &str, config: Value) -> SubscriptionDestination {
    serde_json::from_value(json!({
        "id": Uuid::new_v4(),
        "type": kind,
        "config": config
    }))
    .unwrap()
}

pub fn subscription(name: &str, destinations: Vec<SubscriptionDestination>) -> EventSubscription {
    EventSubscription {
        id: Uuid::new_v4(),
        name: name.to_string(),
        fully_qualified_name: None,
        enabled: true,
        filtering_rules: None,
        destinations,
        batch_size: Some(50),
    }
}

pub fn factory(config: DispatchConfig, feed: Arc<InMemoryFeedStore>) -> Arc<DestinationFactory> {
    factory_with_directory(config, feed, InMemoryDirectory::default())
}

pub fn factory_with_directory(
    config: DispatchConfig,
    feed: Arc<InMemoryFeedStore>,
    directory: InMemoryDirectory,
) -> Arc<DestinationFactory> {
    Arc::new(
        DestinationFactory::new(
            Arc::new(config),
            Arc::new(directory),
            feed,
            Arc::new(LogBroadcaster),
        )
        .unwrap(),
    )
}

/// Consumer over in-memory stores, with handles to the stores for assertions
pub struct Pipeline {
    pub events: Arc<InMemoryEventStore>,
    pub subscriptions: Arc<InMemorySubscriptionStore>,
    pub feed: Arc<InMemoryFeedStore>,
    pub consumer: EventConsumer,
}

pub fn pipeline(subscription: EventSubscription, events: Vec<ChangeEvent>, config: DispatchConfig) -> Pipeline {
    let events = Arc::new(InMemoryEventStore::new(events));
    let subscriptions = Arc::new(InMemorySubscriptionStore::new(vec![subscription.clone()]));
    let feed = Arc::new(InMemoryFeedStore::new());
    let consumer = EventConsumer::new(subscription, events.clone(), subscriptions.clone(), factory(config, feed.clone()));
    Pipeline {
        events,
        subscriptions,
        feed,
        consumer,
    }
}
