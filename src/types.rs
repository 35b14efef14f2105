//! Data structures for change events and subscription destinations
//! Contains the catalog-facing records the dispatcher reads and the status it writes back

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{DispatchError, DispatchResult};
use crate::filter::FilteringRules;

/// Entity type of conversation threads; the activity feed never reacts to these
pub const THREAD_ENTITY_TYPE: &str = "THREAD";
pub const TEST_SUITE_ENTITY_TYPE: &str = "testSuite";
pub const TEST_CASE_ENTITY_TYPE: &str = "testCase";

/// Kind of mutation a change event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    EntityCreated,
    EntityUpdated,
    EntitySoftDeleted,
    EntityDeleted,
    EntityRestored,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::EntityCreated => write!(f, "ENTITY_CREATED"),
            EventType::EntityUpdated => write!(f, "ENTITY_UPDATED"),
            EventType::EntitySoftDeleted => write!(f, "ENTITY_SOFT_DELETED"),
            EventType::EntityDeleted => write!(f, "ENTITY_DELETED"),
            EventType::EntityRestored => write!(f, "ENTITY_RESTORED"),
        }
    }
}

/// One field diff inside a change description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

/// Before/after field diffs of an update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDescription {
    #[serde(default)]
    pub fields_added: Vec<FieldChange>,
    #[serde(default)]
    pub fields_updated: Vec<FieldChange>,
    #[serde(default)]
    pub fields_deleted: Vec<FieldChange>,
}

impl ChangeDescription {
    pub fn is_empty(&self) -> bool {
        self.fields_added.is_empty() && self.fields_updated.is_empty() && self.fields_deleted.is_empty()
    }

    /// Every field name touched by this change
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields_added
            .iter()
            .chain(&self.fields_updated)
            .chain(&self.fields_deleted)
            .map(|f| f.name.as_str())
    }
}

/// An immutable record of one mutation to a tracked entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub id: Uuid,
    /// Creation sequence assigned by the event store
    #[serde(default)]
    pub offset: u64,
    pub event_type: EventType,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub entity_fully_qualified_name: String,
    pub user_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_description: Option<ChangeDescription>,
    /// Snapshot of the entity after the change, when the store captured one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<Value>,
}

impl ChangeEvent {
    pub fn is_thread(&self) -> bool {
        self.entity_type == THREAD_ENTITY_TYPE
    }

    /// Look up a dotted path (`domain.fullyQualifiedName`) in the entity snapshot
    pub fn entity_field(&self, path: &str) -> Option<&Value> {
        let mut current = self.entity.as_ref()?;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }
}

/// Closed set of destination kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DestinationType {
    Webhook,
    Slack,
    MsTeams,
    GChat,
    Email,
    ActivityFeed,
}

impl fmt::Display for DestinationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationType::Webhook => write!(f, "WEBHOOK"),
            DestinationType::Slack => write!(f, "SLACK"),
            DestinationType::MsTeams => write!(f, "MS_TEAMS"),
            DestinationType::GChat => write!(f, "G_CHAT"),
            DestinationType::Email => write!(f, "EMAIL"),
            DestinationType::ActivityFeed => write!(f, "ACTIVITY_FEED"),
        }
    }
}

impl FromStr for DestinationType {
    type Err = DispatchError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.to_uppercase().as_str() {
            "WEBHOOK" => Ok(DestinationType::Webhook),
            "SLACK" => Ok(DestinationType::Slack),
            "MS_TEAMS" => Ok(DestinationType::MsTeams),
            "G_CHAT" => Ok(DestinationType::GChat),
            "EMAIL" => Ok(DestinationType::Email),
            "ACTIVITY_FEED" => Ok(DestinationType::ActivityFeed),
            _ => Err(DispatchError::unsupported(tag)),
        }
    }
}

/// Who, besides the configured endpoint, a destination notifies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SubscriptionCategory {
    Users,
    Teams,
    Admins,
    Assignees,
    Owners,
    Mentions,
    Followers,
    #[default]
    External,
}

/// Delivery state of one destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    AwaitingRetry,
    Failed,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionStatus::Active => write!(f, "ACTIVE"),
            SubscriptionStatus::AwaitingRetry => write!(f, "AWAITING_RETRY"),
            SubscriptionStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Mutable delivery status stored on the destination record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDetails {
    #[serde(default)]
    pub status: SubscriptionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failed_status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failed_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
}

/// Config blob of webhook-style destinations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub http_method: HttpMethod,
    #[serde(default)]
    pub receivers: BTreeSet<String>,
    #[serde(default)]
    pub send_to_admins: bool,
    #[serde(default)]
    pub send_to_owners: bool,
    #[serde(default)]
    pub send_to_followers: bool,
}

/// Config blob of email destinations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAlertConfig {
    #[serde(default)]
    pub receivers: BTreeSet<String>,
    #[serde(default)]
    pub send_to_admins: bool,
    #[serde(default)]
    pub send_to_owners: bool,
    #[serde(default)]
    pub send_to_followers: bool,
}

fn default_enabled() -> bool {
    true
}

/// Persisted configuration and status of one destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDestination {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub destination_type: DestinationType,
    #[serde(default)]
    pub category: SubscriptionCategory,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Connect timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Read timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(default)]
    pub status_details: StatusDetails,
}

impl SubscriptionDestination {
    /// Decode the config blob as a webhook config
    pub fn webhook_config(&self) -> DispatchResult<WebhookConfig> {
        let blob = self.config.clone().ok_or_else(|| {
            DispatchError::config(format!("Destination {} has no webhook config", self.id))
        })?;
        serde_json::from_value(blob).map_err(|e| {
            DispatchError::config(format!("Invalid webhook config for destination {}: {}", self.id, e))
        })
    }

    /// Decode the config blob as an email alert config; a missing blob means no static receivers
    pub fn email_alert_config(&self) -> DispatchResult<EmailAlertConfig> {
        match self.config.clone() {
            Some(blob) => serde_json::from_value(blob).map_err(|e| {
                DispatchError::config(format!("Invalid email config for destination {}: {}", self.id, e))
            }),
            None => Ok(EmailAlertConfig::default()),
        }
    }

    /// Compare everything except the mutable status
    pub fn same_settings(&self, other: &SubscriptionDestination) -> bool {
        self.id == other.id
            && self.destination_type == other.destination_type
            && self.category == other.category
            && self.enabled == other.enabled
            && self.timeout == other.timeout
            && self.read_timeout == other.read_timeout
            && self.config == other.config
    }
}

/// A named group of destinations sharing one filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSubscription {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fully_qualified_name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtering_rules: Option<FilteringRules>,
    #[serde(default)]
    pub destinations: Vec<SubscriptionDestination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

impl EventSubscription {
    /// Name shown to recipients as the alert's publisher
    pub fn publisher_name(&self) -> &str {
        self.fully_qualified_name.as_deref().unwrap_or(&self.name)
    }
}

/// A user or team known to the catalog, with the channels they can be reached on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Profile webhooks keyed by destination kind
    #[serde(default)]
    pub webhooks: BTreeMap<DestinationType, String>,
}

/// Conversation thread created by the activity feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedThread {
    pub id: Uuid,
    /// Entity link in `<#E::type::fqn>` form
    pub about: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub message: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}
