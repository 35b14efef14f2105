//! Configuration management for the change-event dispatcher
//!
//! This module handles loading configuration from environment variables.
//! Validation is kept separate from the environment lookups so it can be
//! exercised directly.

use std::env;
use std::time::Duration;

use tracing::info;

use crate::email_config::EmailConfig;
use crate::errors::{DispatchError, DispatchResult};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const MAX_BATCH_SIZE: usize = 10_000;
/// Fixed delay added to a failed attempt before a retry becomes eligible
pub const DEFAULT_RETRY_BACKOFF_SECS: u64 = 10;
pub const DEFAULT_CATALOG_BASE_URL: &str = "http://localhost:8585";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 12;

/// Validated dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub retry_backoff: chrono::Duration,
    /// Base URL used for entity links in rendered messages
    pub catalog_base_url: String,
    pub default_connect_timeout: Duration,
    pub default_read_timeout: Duration,
    pub email: Option<EmailConfig>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
            retry_backoff: chrono::Duration::seconds(DEFAULT_RETRY_BACKOFF_SECS as i64),
            catalog_base_url: DEFAULT_CATALOG_BASE_URL.to_string(),
            default_connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            default_read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            email: None,
        }
    }
}

/// Raw, unvalidated settings as read from the environment
#[derive(Debug, Clone, Default)]
pub struct RawDispatchSettings {
    pub poll_interval_secs: Option<String>,
    pub batch_size: Option<String>,
    pub retry_backoff_secs: Option<String>,
    pub catalog_base_url: Option<String>,
    pub connect_timeout_secs: Option<String>,
    pub read_timeout_secs: Option<String>,
}

impl DispatchConfig {
    /// Load configuration from environment variables
    ///
    /// # Environment Variables
    ///
    /// Optional (with defaults):
    /// - `POLL_INTERVAL_SECS`: seconds between poll cycles (default: 10)
    /// - `BATCH_SIZE`: events fetched per cycle (default: 100)
    /// - `RETRY_BACKOFF_SECS`: fixed retry backoff window (default: 10)
    /// - `CATALOG_BASE_URL`: base URL for entity links (default: "http://localhost:8585")
    /// - `DEFAULT_CONNECT_TIMEOUT_SECS` / `DEFAULT_READ_TIMEOUT_SECS`: used when a
    ///   destination has no timeouts of its own (defaults: 10 / 12)
    ///
    /// SMTP settings are loaded through [`EmailConfig::from_env`]; when they are
    /// missing, email destinations cannot be constructed.
    pub fn from_env() -> DispatchResult<Self> {
        let raw = RawDispatchSettings {
            poll_interval_secs: env::var("POLL_INTERVAL_SECS").ok(),
            batch_size: env::var("BATCH_SIZE").ok(),
            retry_backoff_secs: env::var("RETRY_BACKOFF_SECS").ok(),
            catalog_base_url: env::var("CATALOG_BASE_URL").ok(),
            connect_timeout_secs: env::var("DEFAULT_CONNECT_TIMEOUT_SECS").ok(),
            read_timeout_secs: env::var("DEFAULT_READ_TIMEOUT_SECS").ok(),
        };

        let email = match EmailConfig::from_env() {
            Ok(email) => Some(email),
            Err(e) => {
                tracing::warn!(
                    "Email configuration not found, email destinations will be disabled: {}",
                    e
                );
                None
            }
        };

        let config = Self::validate_and_create(raw, email)?;
        info!(
            poll_interval = ?config.poll_interval,
            batch_size = config.batch_size,
            catalog_base_url = %config.catalog_base_url,
            "Loaded dispatcher configuration"
        );
        Ok(config)
    }

    /// Validate raw settings and create a DispatchConfig
    pub fn validate_and_create(
        raw: RawDispatchSettings,
        email: Option<EmailConfig>,
    ) -> DispatchResult<Self> {
        let poll_interval_secs =
            parse_u64("POLL_INTERVAL_SECS", raw.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS)?;
        if poll_interval_secs == 0 {
            return Err(DispatchError::config("POLL_INTERVAL_SECS must be greater than zero"));
        }

        let batch_size =
            parse_u64("BATCH_SIZE", raw.batch_size, DEFAULT_BATCH_SIZE as u64)? as usize;
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(DispatchError::config(format!(
                "BATCH_SIZE must be between 1 and {}",
                MAX_BATCH_SIZE
            )));
        }

        let retry_backoff_secs =
            parse_u64("RETRY_BACKOFF_SECS", raw.retry_backoff_secs, DEFAULT_RETRY_BACKOFF_SECS)?;

        let catalog_base_url = raw
            .catalog_base_url
            .unwrap_or_else(|| DEFAULT_CATALOG_BASE_URL.to_string());
        let catalog_base_url = catalog_base_url.trim().trim_end_matches('/').to_string();
        if !catalog_base_url.starts_with("http://") && !catalog_base_url.starts_with("https://") {
            return Err(DispatchError::config(
                "CATALOG_BASE_URL must start with http:// or https://",
            ));
        }

        let connect_timeout = parse_u64(
            "DEFAULT_CONNECT_TIMEOUT_SECS",
            raw.connect_timeout_secs,
            DEFAULT_CONNECT_TIMEOUT_SECS,
        )?;
        let read_timeout = parse_u64(
            "DEFAULT_READ_TIMEOUT_SECS",
            raw.read_timeout_secs,
            DEFAULT_READ_TIMEOUT_SECS,
        )?;

        Ok(Self {
            poll_interval: Duration::from_secs(poll_interval_secs),
            batch_size,
            retry_backoff: chrono::Duration::seconds(retry_backoff_secs as i64),
            catalog_base_url,
            default_connect_timeout: Duration::from_secs(connect_timeout),
            default_read_timeout: Duration::from_secs(read_timeout),
            email,
        })
    }
}

fn parse_u64(name: &str, value: Option<String>, default: u64) -> DispatchResult<u64> {
    match value {
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map_err(|_| DispatchError::config(format!("{} must be a non-negative integer", name))),
        None => Ok(default),
    }
}
