//! Email destination

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{debug, info};

use super::Destination;
use super::targets::{TargetRules, resolve_recipients};
use crate::config::DispatchConfig;
use crate::errors::{DeliveryFailure, DispatchError, DispatchResult, FailureKind};
use crate::formatter::{EmailFormatter, EmailMessage, FormatContext, MessageFormatter};
use crate::store::{MailEnvelope, MailTransport, RecipientDirectory};
use crate::types::{
    ChangeEvent, DestinationType, EmailAlertConfig, EventSubscription, SubscriptionCategory,
    SubscriptionDestination,
};

/// Status code recorded when the mail relay rejects a message
const MAIL_FAILURE_STATUS_CODE: u16 = 500;

pub struct EmailDestination {
    subscription: Arc<EventSubscription>,
    destination: SubscriptionDestination,
    alert: EmailAlertConfig,
    subject_prefix: String,
    mailer: Option<Arc<dyn MailTransport>>,
    directory: Arc<dyn RecipientDirectory>,
    base_url: String,
    retry_backoff: Duration,
}

impl EmailDestination {
    pub fn new(
        subscription: Arc<EventSubscription>,
        destination: SubscriptionDestination,
        config: &DispatchConfig,
        mailer: Arc<dyn MailTransport>,
        directory: Arc<dyn RecipientDirectory>,
    ) -> DispatchResult<Self> {
        if destination.destination_type != DestinationType::Email {
            return Err(DispatchError::config(format!(
                "Destination {} is {} but was configured as EMAIL",
                destination.id, destination.destination_type
            )));
        }
        let alert = destination.email_alert_config()?;
        let subject_prefix = config
            .email
            .as_ref()
            .map(|e| e.subject_prefix.clone())
            .unwrap_or_else(|| "[Catalog]".to_string());

        Ok(Self {
            subscription,
            destination,
            alert,
            subject_prefix,
            mailer: Some(mailer),
            directory,
            base_url: config.catalog_base_url.clone(),
            retry_backoff: config.retry_backoff,
        })
    }

    fn failure(&self, kind: FailureKind, message: String) -> DeliveryFailure {
        DeliveryFailure::new(DestinationType::Email, kind, message)
    }

    /// Literal receivers for EXTERNAL, plus the addresses of selected recipients
    async fn receivers(&self, event: &ChangeEvent) -> DispatchResult<BTreeSet<String>> {
        let mut receivers = BTreeSet::new();
        if self.destination.category == SubscriptionCategory::External {
            receivers.extend(self.alert.receivers.iter().cloned());
        }

        let rules = TargetRules {
            category: self.destination.category,
            receivers: &self.alert.receivers,
            send_to_admins: self.alert.send_to_admins,
            send_to_owners: self.alert.send_to_owners,
            send_to_followers: self.alert.send_to_followers,
        };
        let recipients = resolve_recipients(self.directory.as_ref(), &rules, event).await?;
        receivers.extend(recipients.into_iter().filter_map(|r| r.email));
        Ok(receivers)
    }

    async fn mail(&self, receivers: BTreeSet<String>, message: EmailMessage) -> Result<(), DeliveryFailure> {
        let mailer = self
            .mailer
            .clone()
            .ok_or_else(|| self.failure(FailureKind::Configuration, "destination is closed".to_string()))?;

        if receivers.is_empty() {
            debug!(destination_id = %self.destination.id, "No email receivers, nothing to send");
            return Ok(());
        }

        let publisher = self.subscription.publisher_name();
        let envelope = MailEnvelope {
            to: receivers.into_iter().collect(),
            subject: message.subject(&self.subject_prefix, publisher),
            html_body: message.html_body(publisher),
        };
        let count = envelope.to.len();
        mailer.send(envelope).await.map_err(|e| {
            self.failure(FailureKind::Permanent, e.to_string())
                .with_status_code(Some(MAIL_FAILURE_STATUS_CODE))
        })?;
        info!(destination_id = %self.destination.id, receivers = count, "Email alert sent");
        Ok(())
    }
}

#[async_trait]
impl Destination for EmailDestination {
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

        let outcome = match EmailFormatter.build_entity_message(&ctx, event) {
            Ok(message) => match self.receivers(event).await {
                Ok(receivers) => self.mail(receivers, message).await,
                Err(e) => Err(self.failure(
                    FailureKind::Transient,
                    format!("Failed to resolve receivers: {}", e),
                )),
            },
            Err(e) => Err(self
                .failure(FailureKind::Permanent, e.to_string())
                .with_status_code(Some(MAIL_FAILURE_STATUS_CODE))),
        };

        match outcome {
            Ok(()) => {
                self.set_success_status(Utc::now());
                Ok(())
            }
            Err(failure) => Err(self.record_failure(failure, Some(event))),
        }
    }

    /// Test mails go only to the statically configured receivers
    async fn send_test_message(&mut self) -> Result<(), DeliveryFailure> {
        let subscription = Arc::clone(&self.subscription);
        let ctx = FormatContext {
            publisher_name: subscription.publisher_name(),
            base_url: &self.base_url,
        };

        let outcome = match EmailFormatter.build_test_message(&ctx) {
            Ok(message) => self.mail(self.alert.receivers.clone(), message).await,
            Err(e) => Err(self.failure(FailureKind::Permanent, e.to_string())),
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
        self.mailer = None;
    }
}
