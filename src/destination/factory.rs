//! Destination construction from persisted configuration

use std::sync::Arc;

use tracing::info;

use super::{ActivityFeedDestination, Destination, EmailDestination, WebhookDestination};
use crate::config::DispatchConfig;
use crate::errors::{DispatchError, DispatchResult};
use crate::formatter::WebhookFormat;
use crate::store::{FeedBroadcaster, FeedStore, MailTransport, RecipientDirectory, SmtpMailer};
use crate::types::{DestinationType, EventSubscription, SubscriptionDestination};

/// Builds destinations with the collaborators they deliver through
#[derive(Clone)]
pub struct DestinationFactory {
    config: Arc<DispatchConfig>,
    directory: Arc<dyn RecipientDirectory>,
    feed_store: Arc<dyn FeedStore>,
    broadcaster: Arc<dyn FeedBroadcaster>,
    mailer: Option<Arc<dyn MailTransport>>,
}

impl DestinationFactory {
    /// Uses an SMTP mailer when the configuration carries SMTP settings
    pub fn new(
        config: Arc<DispatchConfig>,
        directory: Arc<dyn RecipientDirectory>,
        feed_store: Arc<dyn FeedStore>,
        broadcaster: Arc<dyn FeedBroadcaster>,
    ) -> DispatchResult<Self> {
        let mailer = match &config.email {
            Some(email) => Some(Arc::new(SmtpMailer::new(email)?) as Arc<dyn MailTransport>),
            None => None,
        };
        Ok(Self {
            config,
            directory,
            feed_store,
            broadcaster,
            mailer,
        })
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn MailTransport>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Create the destination implementation for a destination's kind
    pub fn create(
        &self,
        subscription: Arc<EventSubscription>,
        destination: SubscriptionDestination,
    ) -> DispatchResult<Box<dyn Destination>> {
        let destination_id = destination.id;
        let destination_type = destination.destination_type;

        let created: Box<dyn Destination> = match destination_type {
            DestinationType::Webhook => Box::new(self.webhook(WebhookFormat::Generic, subscription, destination)?),
            DestinationType::Slack => Box::new(self.webhook(WebhookFormat::Slack, subscription, destination)?),
            DestinationType::MsTeams => Box::new(self.webhook(WebhookFormat::MsTeams, subscription, destination)?),
            DestinationType::GChat => Box::new(self.webhook(WebhookFormat::GChat, subscription, destination)?),
            DestinationType::Email => {
                let mailer = self.mailer.clone().ok_or_else(|| {
                    DispatchError::config("Email destinations require SMTP settings (EMAIL_SMTP_HOST, ...)")
                })?;
                Box::new(EmailDestination::new(
                    subscription,
                    destination,
                    &self.config,
                    mailer,
                    Arc::clone(&self.directory),
                )?)
            }
            DestinationType::ActivityFeed => Box::new(ActivityFeedDestination::new(
                subscription,
                destination,
                &self.config,
                Arc::clone(&self.feed_store),
                Arc::clone(&self.broadcaster),
            )?),
        };

        info!(destination_id = %destination_id, destination_type = %destination_type, "Created destination");
        Ok(created)
    }

    fn webhook(
        &self,
        format: WebhookFormat,
        subscription: Arc<EventSubscription>,
        destination: SubscriptionDestination,
    ) -> DispatchResult<WebhookDestination> {
        WebhookDestination::new(
            format,
            subscription,
            destination,
            &self.config,
            Arc::clone(&self.directory),
        )
    }
}
