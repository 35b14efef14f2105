use std::env;

use crate::errors::{DispatchError, DispatchResult};

const DEFAULT_SUBJECT_PREFIX: &str = "[Catalog]";

/// SMTP settings for email destinations
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_email: String,
    pub subject_prefix: String,
}

impl EmailConfig {
    /// Validates email configuration from environment variables
    pub fn from_env() -> DispatchResult<Self> {
        let smtp_host = required("EMAIL_SMTP_HOST")?;
        let smtp_port = required("EMAIL_SMTP_PORT")?
            .parse::<u16>()
            .map_err(|_| DispatchError::config("EMAIL_SMTP_PORT must be a valid port number"))?;
        let smtp_username = required("EMAIL_SMTP_USERNAME")?;
        let smtp_password = required("EMAIL_SMTP_PASSWORD")?;
        let from_email = required("EMAIL_FROM")?;
        let subject_prefix =
            env::var("EMAIL_SUBJECT_PREFIX").unwrap_or_else(|_| DEFAULT_SUBJECT_PREFIX.to_string());

        Ok(Self {
            smtp_host,
            smtp_port,
            smtp_username,
            smtp_password,
            from_email,
            subject_prefix,
        })
    }
}

fn required(name: &str) -> DispatchResult<String> {
    env::var(name).map_err(|_| DispatchError::config(format!("{} environment variable is missing", name)))
}
