//! Error types for the change-event dispatcher
//! Provides structured error handling using thiserror for better error reporting

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{ChangeEvent, DestinationType};

/// How a failed delivery should be treated by the status state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network errors, timeouts, 5xx and 429 responses
    Transient,
    /// 4xx responses (other than 429) and rejected payloads
    Permanent,
    /// The endpoint host could not be resolved
    UnknownHost,
    /// The destination itself is misconfigured or closed
    Configuration,
}

impl FailureKind {
    /// Whether a later attempt may succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Permanent => write!(f, "permanent"),
            FailureKind::UnknownHost => write!(f, "unknown-host"),
            FailureKind::Configuration => write!(f, "configuration"),
        }
    }
}

/// The (destination, event) pair a failed delivery belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct FailedEvent {
    pub destination_id: Uuid,
    pub event: ChangeEvent,
}

/// Raised by a destination after its status has been recorded
///
/// Test sends carry no `failed_event`, so the consumer never requeues them.
#[derive(Debug, Clone, Error)]
#[error("Failed to publish to {destination_type} destination: {message}")]
pub struct DeliveryFailure {
    pub message: String,
    pub destination_type: DestinationType,
    pub kind: FailureKind,
    pub status_code: Option<u16>,
    pub failed_event: Option<FailedEvent>,
    /// When the failed event becomes eligible for its retry, if one was scheduled
    pub next_attempt: Option<DateTime<Utc>>,
}

impl DeliveryFailure {
    pub fn new<S: Into<String>>(
        destination_type: DestinationType,
        kind: FailureKind,
        message: S,
    ) -> Self {
        Self {
            message: message.into(),
            destination_type,
            kind,
            status_code: None,
            failed_event: None,
            next_attempt: None,
        }
    }

    pub fn with_status_code(mut self, status_code: Option<u16>) -> Self {
        self.status_code = status_code;
        self
    }

    /// Attach the destination and event so the consumer can retry this exact pair
    pub fn for_event(mut self, destination_id: Uuid, event: &ChangeEvent) -> Self {
        self.failed_event = Some(FailedEvent {
            destination_id,
            event: event.clone(),
        });
        self
    }
}

/// Main error type for the dispatcher
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Destination or process configuration is missing or inconsistent
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A destination type tag this build does not know about
    #[error("Unsupported destination type: {tag}")]
    UnsupportedDestinationType { tag: String },

    /// A delivery attempt failed after its status was recorded
    #[error(transparent)]
    Delivery(#[from] DeliveryFailure),

    /// The change-event store could not serve a batch
    #[error("Event store read error: {message}")]
    Read { message: String },

    /// A collaborator store rejected a write
    #[error("Store error: {message}")]
    Store { message: String },

    /// A message could not be rendered for a destination
    #[error("Message formatting error: {message}")]
    Formatting { message: String },

    #[error("HTTP client error")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    /// Task execution errors for async operations
    #[error("Task execution error")]
    TaskExecution(#[from] tokio::task::JoinError),

    /// Generic error for compatibility
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for convenience
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

impl DispatchError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an unsupported-type error
    pub fn unsupported<S: Into<String>>(tag: S) -> Self {
        Self::UnsupportedDestinationType { tag: tag.into() }
    }

    /// Create an event-store read error
    pub fn read<S: Into<String>>(message: S) -> Self {
        Self::Read {
            message: message.into(),
        }
    }

    /// Create a store write error
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a formatting error
    pub fn formatting<S: Into<String>>(message: S) -> Self {
        Self::Formatting {
            message: message.into(),
        }
    }
}
