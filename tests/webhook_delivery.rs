//! Webhook-style destinations against a mock HTTP endpoint

mod common;

use std::sync::Arc;

use alert_relay::config::DispatchConfig;
use alert_relay::destination::Destination;
use alert_relay::errors::FailureKind;
use alert_relay::signature::{signature_header_value, verify_signature};
use alert_relay::store::{DirectorySnapshot, InMemoryDirectory, InMemoryFeedStore};
use alert_relay::types::{ChangeEvent, DestinationType, Recipient, SubscriptionStatus};
use common::{CaptureResponder, SECRET, destination, factory, factory_with_directory, subscription, table_event};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

fn build(kind: &str, config: serde_json::Value) -> Box<dyn Destination> {
    let settings = destination(kind, config);
    let subscription = Arc::new(subscription("orders", vec![settings.clone()]));
    factory(DispatchConfig::default(), Arc::new(InMemoryFeedStore::new()))
        .create(subscription, settings)
        .unwrap()
}

/// Webhook destination whose owners are looked up in a directory with one user
fn build_with_owner(config: serde_json::Value, owner_hook: &str) -> Box<dyn Destination> {
    let snapshot = DirectorySnapshot {
        users: vec![Recipient {
            name: "bob".to_string(),
            email: None,
            webhooks: [(DestinationType::Webhook, owner_hook.to_string())].into_iter().collect(),
        }],
        ..Default::default()
    };
    let settings = destination("WEBHOOK", config);
    let subscription = Arc::new(subscription("orders", vec![settings.clone()]));
    factory_with_directory(
        DispatchConfig::default(),
        Arc::new(InMemoryFeedStore::new()),
        InMemoryDirectory::new(snapshot),
    )
    .create(subscription, settings)
    .unwrap()
}

fn owned_event(fqn: &str) -> ChangeEvent {
    let mut event = table_event(fqn);
    event.entity = Some(json!({ "owners": [{ "name": "bob", "type": "user" }] }));
    event
}

#[tokio::test]
async fn test_owner_profile_webhook_receives_signed_copy() {
    let server = MockServer::start().await;
    let primary = CaptureResponder::new();
    let owner = CaptureResponder::new();
    Mock::given(path("/hook")).respond_with(primary.clone()).mount(&server).await;
    Mock::given(path("/owner")).respond_with(owner.clone()).mount(&server).await;

    let mut webhook = build_with_owner(
        json!({
            "endpoint": format!("{}/hook", server.uri()),
            "secretKey": SECRET,
            "sendToOwners": true
        }),
        &format!("{}/owner", server.uri()),
    );
    webhook.send_message(&owned_event("svc.db.orders")).await.unwrap();

    assert_eq!(primary.request_count(), 1);
    assert_eq!(owner.request_count(), 1);
    for request in primary.requests().iter().chain(owner.requests().iter()) {
        let header = request.header("X-Signature").expect("signature header missing");
        assert!(verify_signature(header, SECRET, &request.body));
    }
    assert_eq!(webhook.status_details().status, SubscriptionStatus::Active);
}

#[tokio::test]
async fn test_owners_category_without_flag_reaches_owner() {
    let server = MockServer::start().await;
    let owner = CaptureResponder::new();
    Mock::given(path("/owner")).respond_with(owner.clone()).mount(&server).await;

    let settings: alert_relay::types::SubscriptionDestination = serde_json::from_value(json!({
        "id": uuid::Uuid::new_v4(),
        "type": "WEBHOOK",
        "category": "Owners",
        "config": {}
    }))
    .unwrap();
    let snapshot = DirectorySnapshot {
        users: vec![Recipient {
            name: "bob".to_string(),
            email: None,
            webhooks: [(DestinationType::Webhook, format!("{}/owner", server.uri()))].into_iter().collect(),
        }],
        ..Default::default()
    };
    let subscription = Arc::new(subscription("orders", vec![settings.clone()]));
    let mut webhook = factory_with_directory(
        DispatchConfig::default(),
        Arc::new(InMemoryFeedStore::new()),
        InMemoryDirectory::new(snapshot),
    )
    .create(subscription, settings)
    .unwrap();

    webhook.send_message(&owned_event("svc.db.orders")).await.unwrap();
    assert_eq!(owner.request_count(), 1);
}

#[tokio::test]
async fn test_owner_url_equal_to_endpoint_is_sent_once() {
    let server = MockServer::start().await;
    let capture = CaptureResponder::new();
    Mock::given(path("/hook")).respond_with(capture.clone()).mount(&server).await;

    let endpoint = format!("{}/hook", server.uri());
    let mut webhook = build_with_owner(json!({ "endpoint": endpoint, "sendToOwners": true }), &endpoint);
    webhook.send_message(&owned_event("svc.db.orders")).await.unwrap();

    assert_eq!(capture.request_count(), 1);
}

#[tokio::test]
async fn test_failing_owner_target_marks_destination() {
    let server = MockServer::start().await;
    let primary = CaptureResponder::new();
    Mock::given(path("/hook")).respond_with(primary.clone()).mount(&server).await;
    Mock::given(path("/owner"))
        .respond_with(CaptureResponder::with_status(503))
        .mount(&server)
        .await;

    let mut webhook = build_with_owner(
        json!({ "endpoint": format!("{}/hook", server.uri()), "sendToOwners": true }),
        &format!("{}/owner", server.uri()),
    );
    let failure = webhook.send_message(&owned_event("svc.db.orders")).await.unwrap_err();

    assert_eq!(primary.request_count(), 1);
    assert_eq!(failure.kind, FailureKind::Transient);
    assert_eq!(failure.status_code, Some(503));
    assert_eq!(webhook.status_details().status, SubscriptionStatus::AwaitingRetry);
}

#[tokio::test]
async fn test_signed_post_carries_verifiable_signature() {
    let server = MockServer::start().await;
    let capture = CaptureResponder::new();
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(capture.clone())
        .mount(&server)
        .await;

    let mut webhook = build(
        "WEBHOOK",
        json!({ "endpoint": format!("{}/hook", server.uri()), "secretKey": SECRET }),
    );
    webhook.send_message(&table_event("svc.db.orders")).await.unwrap();

    let requests = capture.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    let header = request.header("X-Signature").expect("signature header missing");
    assert_eq!(header, signature_header_value(SECRET, &request.body).unwrap());
    assert!(header.starts_with("sha256="));
    assert!(verify_signature(header, SECRET, &request.body));
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(request.body_json()["entityFullyQualifiedName"], "svc.db.orders");

    assert_eq!(webhook.status_details().status, SubscriptionStatus::Active);
    assert!(webhook.status_details().last_successful_at.is_some());
}

#[tokio::test]
async fn test_unsigned_webhook_sends_no_signature() {
    let server = MockServer::start().await;
    let capture = CaptureResponder::new();
    Mock::given(method("POST"))
        .respond_with(capture.clone())
        .mount(&server)
        .await;

    let mut webhook = build("WEBHOOK", json!({ "endpoint": format!("{}/hook", server.uri()) }));
    webhook.send_message(&table_event("svc.db.orders")).await.unwrap();

    assert!(capture.requests()[0].header("X-Signature").is_none());
}

#[tokio::test]
async fn test_put_with_custom_headers() {
    let server = MockServer::start().await;
    let capture = CaptureResponder::new();
    Mock::given(method("PUT"))
        .and(path("/hook"))
        .respond_with(capture.clone())
        .mount(&server)
        .await;

    let mut webhook = build(
        "WEBHOOK",
        json!({
            "endpoint": format!("{}/hook", server.uri()),
            "httpMethod": "PUT",
            "headers": { "X-Team": "data-platform", "Authorization": "Bearer t0k3n" }
        }),
    );
    webhook.send_message(&table_event("svc.db.orders")).await.unwrap();

    let request = &capture.requests()[0];
    assert_eq!(request.method, "PUT");
    assert_eq!(request.header("x-team"), Some("data-platform"));
    assert_eq!(request.header("authorization"), Some("Bearer t0k3n"));
}

#[tokio::test]
async fn test_server_error_awaits_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(CaptureResponder::with_status(503))
        .mount(&server)
        .await;

    let mut webhook = build("SLACK", json!({ "endpoint": format!("{}/hook", server.uri()) }));
    let event = table_event("svc.db.orders");
    let failure = webhook.send_message(&event).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::Transient);
    assert_eq!(failure.status_code, Some(503));
    assert!(failure.next_attempt.is_some());
    assert_eq!(failure.failed_event.as_ref().unwrap().event.id, event.id);

    let status = webhook.status_details();
    assert_eq!(status.status, SubscriptionStatus::AwaitingRetry);
    assert_eq!(status.last_failed_status_code, Some(503));
    assert!(status.next_attempt.is_some());
}

#[tokio::test]
async fn test_client_error_fails_permanently() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(CaptureResponder::with_status(404))
        .mount(&server)
        .await;

    let mut webhook = build("MS_TEAMS", json!({ "endpoint": format!("{}/hook", server.uri()) }));
    let failure = webhook.send_message(&table_event("svc.db.orders")).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::Permanent);
    assert!(failure.next_attempt.is_none());
    assert_eq!(webhook.status_details().status, SubscriptionStatus::Failed);
    assert_eq!(webhook.status_details().last_failed_status_code, Some(404));
}

#[tokio::test]
async fn test_unknown_host_is_failed_with_400() {
    let mut webhook = build("WEBHOOK", json!({ "endpoint": "http://unreachable-host.invalid/hook" }));
    let failure = webhook.send_message(&table_event("svc.db.orders")).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::UnknownHost);
    assert_eq!(failure.status_code, Some(400));
    let status = webhook.status_details();
    assert_eq!(status.status, SubscriptionStatus::Failed);
    assert_eq!(status.last_failed_status_code, Some(400));
    assert!(status.last_failed_reason.as_deref().unwrap().starts_with("UnknownHostException"));
}

#[tokio::test]
async fn test_chat_payload_shapes() {
    let server = MockServer::start().await;
    let slack = CaptureResponder::new();
    let teams = CaptureResponder::new();
    let gchat = CaptureResponder::new();
    Mock::given(path("/slack")).respond_with(slack.clone()).mount(&server).await;
    Mock::given(path("/teams")).respond_with(teams.clone()).mount(&server).await;
    Mock::given(path("/gchat")).respond_with(gchat.clone()).mount(&server).await;

    let event = table_event("svc.db.orders");
    for (kind, route) in [("SLACK", "/slack"), ("MS_TEAMS", "/teams"), ("G_CHAT", "/gchat")] {
        let mut destination = build(kind, json!({ "endpoint": format!("{}{}", server.uri(), route) }));
        destination.send_message(&event).await.unwrap();
    }

    let slack_body = slack.requests()[0].body_json();
    assert!(slack_body["text"].as_str().unwrap().contains("svc.db.orders"));
    assert!(slack_body["blocks"].as_array().unwrap().len() >= 2);

    let teams_body = teams.requests()[0].body_json();
    assert_eq!(teams_body["@type"], "MessageCard");
    assert!(!teams_body["sections"].as_array().unwrap().is_empty());

    let gchat_body = gchat.requests()[0].body_json();
    assert!(gchat_body["cardsV2"][0]["card"]["header"]["title"].is_string());
}

#[tokio::test]
async fn test_test_message_and_close() {
    let server = MockServer::start().await;
    let capture = CaptureResponder::new();
    Mock::given(method("POST"))
        .respond_with(capture.clone())
        .mount(&server)
        .await;

    let mut webhook = build("WEBHOOK", json!({ "endpoint": format!("{}/hook", server.uri()) }));
    webhook.send_test_message().await.unwrap();
    assert!(capture.requests()[0].body_json()["message"].is_string());

    webhook.close();
    webhook.close();
    let failure = webhook.send_message(&table_event("svc.db.orders")).await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::Configuration);
    assert_eq!(capture.request_count(), 1);
}
