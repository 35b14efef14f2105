//! HTTP destinations: generic webhooks, Slack, Microsoft Teams and Google Chat
//!
//! All four kinds share the same delivery path and differ only in the
//! [`WebhookFormat`] used to render the body. The configured endpoint is the
//! primary target; recipients selected by the category contribute their
//! profile webhook of the same kind.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use super::Destination;
use super::targets::{TargetRules, push_unique, resolve_recipients};
use crate::config::DispatchConfig;
use crate::errors::{DeliveryFailure, DispatchError, DispatchResult, FailureKind};
use crate::formatter::{FormatContext, WebhookFormat};
use crate::signature::{SIGNATURE_HEADER, signature_header_value};
use crate::store::RecipientDirectory;
use crate::types::{
    ChangeEvent, EventSubscription, HttpMethod, SubscriptionCategory, SubscriptionDestination, WebhookConfig,
};

pub struct WebhookDestination {
    subscription: Arc<EventSubscription>,
    destination: SubscriptionDestination,
    webhook: WebhookConfig,
    format: WebhookFormat,
    client: Option<Client>,
    directory: Arc<dyn RecipientDirectory>,
    base_url: String,
    retry_backoff: Duration,
}

impl WebhookDestination {
    pub fn new(
        format: WebhookFormat,
        subscription: Arc<EventSubscription>,
        destination: SubscriptionDestination,
        config: &DispatchConfig,
        directory: Arc<dyn RecipientDirectory>,
    ) -> DispatchResult<Self> {
        if destination.destination_type != format.destination_type() {
            return Err(DispatchError::config(format!(
                "Destination {} is {} but was configured as {}",
                destination.id,
                destination.destination_type,
                format.destination_type()
            )));
        }

        let webhook = destination.webhook_config()?;
        match webhook.endpoint.as_deref() {
            Some(endpoint) => {
                let url = Url::parse(endpoint).map_err(|e| {
                    DispatchError::config(format!("Invalid endpoint {} for destination {}: {}", endpoint, destination.id, e))
                })?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(DispatchError::config(format!(
                        "Endpoint of destination {} must be http or https",
                        destination.id
                    )));
                }
            }
            None if destination.category == SubscriptionCategory::External => {
                return Err(DispatchError::config(format!(
                    "External destination {} has no endpoint",
                    destination.id
                )));
            }
            None => {}
        }

        let connect_timeout = destination
            .timeout
            .map(StdDuration::from_secs)
            .unwrap_or(config.default_connect_timeout);
        let read_timeout = destination
            .read_timeout
            .map(StdDuration::from_secs)
            .unwrap_or(config.default_read_timeout);
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(connect_timeout + read_timeout)
            .build()?;

        Ok(Self {
            subscription,
            destination,
            webhook,
            format,
            client: Some(client),
            directory,
            base_url: config.catalog_base_url.clone(),
            retry_backoff: config.retry_backoff,
        })
    }

    pub fn format(&self) -> WebhookFormat {
        self.format
    }

    fn failure(&self, kind: FailureKind, message: String) -> DeliveryFailure {
        DeliveryFailure::new(self.destination.destination_type, kind, message)
    }

    fn client(&self) -> Result<Client, DeliveryFailure> {
        self.client
            .clone()
            .ok_or_else(|| self.failure(FailureKind::Configuration, "destination is closed".to_string()))
    }

    /// Endpoint first, then recipients' profile webhooks, each URL once
    async fn targets(&self, event: &ChangeEvent) -> Result<Vec<String>, DeliveryFailure> {
        let mut targets = Vec::new();
        if let Some(endpoint) = &self.webhook.endpoint {
            push_unique(&mut targets, endpoint);
        }

        let rules = TargetRules {
            category: self.destination.category,
            receivers: &self.webhook.receivers,
            send_to_admins: self.webhook.send_to_admins,
            send_to_owners: self.webhook.send_to_owners,
            send_to_followers: self.webhook.send_to_followers,
        };
        let recipients = resolve_recipients(self.directory.as_ref(), &rules, event)
            .await
            .map_err(|e| self.failure(FailureKind::Transient, format!("Failed to resolve recipients: {}", e)))?;
        for recipient in &recipients {
            if let Some(url) = recipient.webhooks.get(&self.destination.destination_type) {
                push_unique(&mut targets, url);
            }
        }
        Ok(targets)
    }

    async fn deliver(&self, client: &Client, url: &str, body: &str) -> Result<(), DeliveryFailure> {
        let mut request = match self.webhook.http_method {
            HttpMethod::Post => client.post(url),
            HttpMethod::Put => client.put(url),
        }
        .header(CONTENT_TYPE, "application/json");

        for (name, value) in &self.webhook.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        if let Some(secret) = self.webhook.secret_key.as_deref().filter(|s| !s.is_empty()) {
            let signature = signature_header_value(secret, body.as_bytes())
                .map_err(|e| self.failure(FailureKind::Configuration, e.to_string()))?;
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| self.classify_request_error(&e))?;

        let status = response.status();
        if status.is_success() {
            debug!(url, status = status.as_u16(), "Webhook accepted");
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        Err(self
            .failure(classify_status(status), format!("{} returned {}: {}", url, status, detail))
            .with_status_code(Some(status.as_u16())))
    }

    fn classify_request_error(&self, error: &reqwest::Error) -> DeliveryFailure {
        if is_name_resolution_failure(error) {
            return self.failure(FailureKind::UnknownHost, describe(error));
        }
        let kind = if error.is_builder() {
            FailureKind::Configuration
        } else {
            FailureKind::Transient
        };
        self.failure(kind, describe(error))
            .with_status_code(error.status().map(|s| s.as_u16()))
    }

    async fn send_to_all(&self, targets: &[String], body: &str) -> Result<(), DeliveryFailure> {
        let client = self.client()?;
        for url in targets {
            self.deliver(&client, url, body).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Destination for WebhookDestination {
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
        let subscription = Arc::clone(&self.subscription);
        let ctx = FormatContext {
            publisher_name: subscription.publisher_name(),
            base_url: &self.base_url,
        };

        let outcome = match self.format.entity_body(&ctx, event) {
            Ok(body) => match self.targets(event).await {
                Ok(targets) => self.send_to_all(&targets, &body).await,
                Err(failure) => Err(failure),
            },
            Err(e) => Err(self
                .failure(FailureKind::Permanent, e.to_string())
                .with_status_code(Some(500))),
        };

        match outcome {
            Ok(()) => {
                self.set_success_status(Utc::now());
                debug!(destination_id = %self.destination.id, event_id = %event.id, "Event delivered");
                Ok(())
            }
            Err(failure) => Err(self.record_failure(failure, Some(event))),
        }
    }

    async fn send_test_message(&mut self) -> Result<(), DeliveryFailure> {
        let subscription = Arc::clone(&self.subscription);
        let ctx = FormatContext {
            publisher_name: subscription.publisher_name(),
            base_url: &self.base_url,
        };

        let outcome = match (self.format.test_body(&ctx), self.webhook.endpoint.clone()) {
            (Ok(body), Some(endpoint)) => self.send_to_all(&[endpoint], &body).await,
            (Ok(_), None) => Err(self.failure(
                FailureKind::Configuration,
                "no endpoint configured for a test message".to_string(),
            )),
            (Err(e), _) => Err(self.failure(FailureKind::Permanent, e.to_string())),
        };

        match outcome {
            Ok(()) => {
                self.set_success_status(Utc::now());
                Ok(())
            }
            Err(failure) => Err(self.record_failure(failure, None)),
        }
    }

    fn close(&mut self) {
        if self.client.take().is_some() {
            debug!(destination_id = %self.destination.id, "Closed webhook client");
        }
    }
}

fn classify_status(status: StatusCode) -> FailureKind {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        FailureKind::Transient
    } else {
        FailureKind::Permanent
    }
}

/// Whether the error chain bottoms out in a failed host lookup
pub fn is_name_resolution_failure(error: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        let text = err.to_string().to_lowercase();
        if text.contains("dns error")
            || text.contains("failed to lookup address")
            || text.contains("name or service not known")
            || text.contains("no such host")
        {
            return true;
        }
        current = err.source();
    }
    false
}

/// The error and its causes on one line
fn describe(error: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut current = error.source();
    while let Some(err) = current {
        parts.push(err.to_string());
        current = err.source();
    }
    parts.join(": ")
}
