//! Correlation IDs for consumer runs
//!
//! Every poll cycle gets its own correlation ID and span so all log lines of
//! one run (retries, deliveries, the commit) can be grepped together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use tracing::Span;

/// Global counter for generating sequential correlation IDs
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifies one consumer run
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new correlation ID using timestamp and counter
    pub fn new() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let counter = CORRELATION_COUNTER.fetch_add(1, Ordering::SeqCst);
        CorrelationId(format!("{}-{}", timestamp, counter))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Span and correlation ID of one consumer run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub correlation_id: CorrelationId,
    pub span: Span,
}

impl RunContext {
    pub fn new(subscription: &str) -> Self {
        let correlation_id = CorrelationId::new();
        let span = tracing::info_span!(
            "consumer_run",
            correlation_id = %correlation_id,
            subscription = subscription,
            component = "alert-relay"
        );

        Self {
            correlation_id,
            span,
        }
    }
}
