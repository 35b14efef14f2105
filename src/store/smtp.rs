//! SMTP mail transport

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{debug, error};

use super::{MailEnvelope, MailTransport};
use crate::email_config::EmailConfig;
use crate::errors::{DispatchError, DispatchResult};

/// Sends mail through the configured relay; the blocking transport runs off the async workers
#[derive(Clone)]
pub struct SmtpMailer {
    from: Mailbox,
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> DispatchResult<Self> {
        let from = config
            .from_email
            .parse::<Mailbox>()
            .map_err(|e| DispatchError::config(format!("Invalid sender address {}: {}", config.from_email, e)))?;

        let transport = SmtpTransport::builder_dangerous(config.smtp_host.as_str())
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ))
            .build();

        Ok(Self { from, transport })
    }

    fn build_message(&self, mail: MailEnvelope) -> DispatchResult<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(mail.subject)
            .header(ContentType::TEXT_HTML);
        for to in &mail.to {
            let mailbox = to
                .parse::<Mailbox>()
                .map_err(|e| DispatchError::config(format!("Invalid recipient address {}: {}", to, e)))?;
            builder = builder.to(mailbox);
        }
        builder
            .body(mail.html_body)
            .map_err(|e| DispatchError::formatting(format!("Failed to build email: {}", e)))
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, mail: MailEnvelope) -> DispatchResult<()> {
        let recipients = mail.to.len();
        let message = self.build_message(mail)?;
        let transport = self.transport.clone();

        let result = tokio::task::spawn_blocking(move || transport.send(&message)).await?;
        match result {
            Ok(_) => {
                debug!(recipients, "Email sent");
                Ok(())
            }
            Err(e) => {
                error!("Failed to send email: {}", e);
                Err(DispatchError::store(format!("SMTP send failed: {}", e)))
            }
        }
    }
}
