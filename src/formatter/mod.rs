//! Message formatting for change events
//! Converts change events into destination-specific message shapes
//!
//! Every rich-text kind renders the same [`OutgoingMessage`] (a header plus one
//! line per field diff) using its own [`Markup`], then wraps it in the payload
//! shape its receiver expects.

use serde::Serialize;
use serde_json::Value;

use crate::errors::{DispatchError, DispatchResult};
use crate::types::{ChangeDescription, ChangeEvent, DestinationType, EventType, FieldChange};

pub mod email;
pub mod feed;
pub mod gchat;
pub mod json;
pub mod slack;
pub mod teams;

pub use email::{EmailFormatter, EmailMessage};
pub use feed::FeedFormatter;
pub use gchat::{GChatFormatter, GChatMessage};
pub use json::JsonFormatter;
pub use slack::{SlackFormatter, SlackMessage};
pub use teams::{TeamsFormatter, TeamsMessage};

/// Longest rendered field value before truncation
const MAX_FIELD_LENGTH: usize = 1000;

/// How entity links are written for a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStyle {
    /// `<url|text>`
    Angle,
    /// `[text](url)`
    Markdown,
    /// `<a href='url'>text</a>`
    Html,
    /// `[text](/type/fqn)`, relative to the catalog UI
    RelativeMarkdown,
}

/// Rich-text vocabulary of one destination kind
#[derive(Debug, Clone, Copy)]
pub struct Markup {
    pub bold_open: &'static str,
    pub bold_close: &'static str,
    /// Escape inserted text for kinds rendered as HTML
    pub escape_html: bool,
    pub add_open: &'static str,
    pub add_close: &'static str,
    pub remove_open: &'static str,
    pub remove_close: &'static str,
    pub link_style: LinkStyle,
}

impl Markup {
    pub fn bold(&self, text: &str) -> String {
        format!("{}{}{}", self.bold_open, self.text(text), self.bold_close)
    }

    pub fn added(&self, text: &str) -> String {
        format!("{}{}{}", self.add_open, self.text(text), self.add_close)
    }

    pub fn removed(&self, text: &str) -> String {
        format!("{}{}{}", self.remove_open, self.text(text), self.remove_close)
    }

    fn text(&self, text: &str) -> String {
        if self.escape_html {
            html_escape(text)
        } else {
            text.to_string()
        }
    }

    pub fn entity_link(&self, base_url: &str, entity_type: &str, fqn: &str) -> String {
        let fqn = self.text(fqn.trim());
        let fqn = fqn.as_str();
        match self.link_style {
            LinkStyle::Angle => format!(
                "<{}/{}/{}|{}>",
                base_url,
                entity_type,
                fqn.replace(' ', "%20"),
                fqn
            ),
            LinkStyle::Markdown => format!("[{}]({}/{}/{})", fqn, base_url, entity_type, fqn),
            LinkStyle::Html => format!("<a href='{}/{}/{}'>{}</a>", base_url, entity_type, fqn, fqn),
            LinkStyle::RelativeMarkdown => format!("[{}](/{}/{})", fqn, entity_type, fqn),
        }
    }
}

pub(crate) fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Inputs shared by every formatter call
#[derive(Debug, Clone, Copy)]
pub struct FormatContext<'a> {
    pub publisher_name: &'a str,
    pub base_url: &'a str,
}

/// Kind-neutral rendering of one event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    pub header: String,
    pub user_name: String,
    pub entity_url: String,
    pub messages: Vec<String>,
}

/// Formatter trait for converting change events into a destination payload
pub trait MessageFormatter {
    type Message: Serialize;

    /// Message for a real change event
    fn build_entity_message(
        &self,
        ctx: &FormatContext<'_>,
        event: &ChangeEvent,
    ) -> DispatchResult<Self::Message>;

    /// Fixed diagnostic message used for connectivity checks
    fn build_test_message(&self, ctx: &FormatContext<'_>) -> DispatchResult<Self::Message>;
}

/// Render the header and change lines of an event with the given markup
pub fn build_outgoing_message(
    markup: &Markup,
    ctx: &FormatContext<'_>,
    event: &ChangeEvent,
) -> OutgoingMessage {
    let entity_url = markup.entity_link(
        ctx.base_url,
        &event.entity_type,
        &event.entity_fully_qualified_name,
    );
    let header = format!(
        "[{}] {} {} {} {}",
        ctx.publisher_name,
        event.user_name,
        event_verb(event.event_type),
        event.entity_type,
        entity_url
    );

    let messages = match event.change_description.as_ref().filter(|cd| !cd.is_empty()) {
        Some(change) => field_change_lines(markup, change),
        None => lifecycle_line(markup, event, &entity_url).into_iter().collect(),
    };

    OutgoingMessage {
        header,
        user_name: event.user_name.clone(),
        entity_url,
        messages,
    }
}

/// Same as [`build_outgoing_message`], but an event with nothing to say is an error
pub(crate) fn require_messages(outgoing: OutgoingMessage, event: &ChangeEvent) -> DispatchResult<OutgoingMessage> {
    if outgoing.messages.is_empty() {
        return Err(DispatchError::formatting(format!(
            "No messages found for event {} on {}",
            event.id, event.entity_fully_qualified_name
        )));
    }
    Ok(outgoing)
}

pub(crate) fn test_message_text(kind: &str) -> String {
    format!(
        "This is a test message from the catalog to confirm your {} destination is configured correctly.",
        kind
    )
}

fn event_verb(event_type: EventType) -> &'static str {
    match event_type {
        EventType::EntityCreated => "created",
        EventType::EntityUpdated => "updated",
        EventType::EntitySoftDeleted => "soft deleted",
        EventType::EntityDeleted => "deleted",
        EventType::EntityRestored => "restored",
    }
}

fn lifecycle_line(markup: &Markup, event: &ChangeEvent, entity_url: &str) -> Option<String> {
    let what = match event.event_type {
        EventType::EntityCreated => "was created",
        EventType::EntitySoftDeleted => "was soft deleted",
        EventType::EntityDeleted => "was deleted",
        EventType::EntityRestored => "was restored",
        EventType::EntityUpdated => return None,
    };
    Some(format!("{} {} {}", markup.bold(&event.entity_type), entity_url, what))
}

fn field_change_lines(markup: &Markup, change: &ChangeDescription) -> Vec<String> {
    let mut lines = Vec::new();

    for field in &change.fields_added {
        if let Some(new) = render_value(field.new_value.as_ref()) {
            lines.push(format!("Added {}: {}", markup.bold(&field.name), markup.added(&new)));
        }
    }

    for field in &change.fields_updated {
        lines.push(updated_line(markup, field));
    }

    for field in &change.fields_deleted {
        let line = match render_value(field.old_value.as_ref()) {
            Some(old) => format!("Deleted {}: {}", markup.bold(&field.name), markup.removed(&old)),
            None => format!("Deleted {}", markup.bold(&field.name)),
        };
        lines.push(line);
    }

    lines
}

fn updated_line(markup: &Markup, field: &FieldChange) -> String {
    let old = render_value(field.old_value.as_ref());
    let new = render_value(field.new_value.as_ref());
    match (old, new) {
        (Some(old), Some(new)) => format!(
            "Updated {}: {} {}",
            markup.bold(&field.name),
            markup.removed(&old),
            markup.added(&new)
        ),
        (None, Some(new)) => format!("Updated {}: {}", markup.bold(&field.name), markup.added(&new)),
        (Some(old), None) => format!("Updated {}: {}", markup.bold(&field.name), markup.removed(&old)),
        (None, None) => format!("Updated {}", markup.bold(&field.name)),
    }
}

/// Human-readable value; entity references collapse to their names
fn render_value(value: Option<&Value>) -> Option<String> {
    let rendered = match value? {
        Value::Null => return None,
        Value::String(s) if s.is_empty() => return None,
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other
                        .get("name")
                        .or_else(|| other.get("tagFQN"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| other.to_string()),
                })
                .collect();
            if parts.is_empty() {
                return None;
            }
            parts.join(", ")
        }
        Value::Object(map) => map
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
        other => other.to_string(),
    };
    Some(truncate(rendered))
}

fn truncate(mut value: String) -> String {
    if value.len() > MAX_FIELD_LENGTH {
        let mut cut = MAX_FIELD_LENGTH;
        while !value.is_char_boundary(cut) {
            cut -= 1;
        }
        value.truncate(cut);
        value.push_str("... (truncated)");
    }
    value
}

/// Payload strategy of webhook-style destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookFormat {
    Generic,
    Slack,
    MsTeams,
    GChat,
}

impl WebhookFormat {
    pub fn destination_type(&self) -> DestinationType {
        match self {
            WebhookFormat::Generic => DestinationType::Webhook,
            WebhookFormat::Slack => DestinationType::Slack,
            WebhookFormat::MsTeams => DestinationType::MsTeams,
            WebhookFormat::GChat => DestinationType::GChat,
        }
    }

    /// Serialized request body for an event
    pub fn entity_body(&self, ctx: &FormatContext<'_>, event: &ChangeEvent) -> DispatchResult<String> {
        match self {
            WebhookFormat::Generic => to_body(&JsonFormatter.build_entity_message(ctx, event)?),
            WebhookFormat::Slack => to_body(&SlackFormatter.build_entity_message(ctx, event)?),
            WebhookFormat::MsTeams => to_body(&TeamsFormatter.build_entity_message(ctx, event)?),
            WebhookFormat::GChat => to_body(&GChatFormatter.build_entity_message(ctx, event)?),
        }
    }

    /// Serialized request body for a connectivity test
    pub fn test_body(&self, ctx: &FormatContext<'_>) -> DispatchResult<String> {
        match self {
            WebhookFormat::Generic => to_body(&JsonFormatter.build_test_message(ctx)?),
            WebhookFormat::Slack => to_body(&SlackFormatter.build_test_message(ctx)?),
            WebhookFormat::MsTeams => to_body(&TeamsFormatter.build_test_message(ctx)?),
            WebhookFormat::GChat => to_body(&GChatFormatter.build_test_message(ctx)?),
        }
    }
}

fn to_body<T: Serialize>(message: &T) -> DispatchResult<String> {
    Ok(serde_json::to_string(message)?)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outgoing_message_lines() {
        let msg = build_outgoing_message(&slack::MARKUP, &ctx(), &updated_event());

        assert_eq!(msg.user_name, "alice");
        assert!(msg.header.starts_with("[orders-alerts] alice updated table"));
        assert_eq!(
            msg.messages,
            vec![
                "Added *tags*: *PII.Sensitive*".to_string(),
                "Updated *description*: ~old text~ *new text*".to_string(),
            ]
        );
    }

    #[test]
    fn test_created_event_without_diff_gets_lifecycle_line() {
        let mut event = updated_event();
        event.event_type = EventType::EntityCreated;
        event.change_description = None;

        let msg = build_outgoing_message(&teams::MARKUP, &ctx(), &event);
        assert_eq!(msg.messages.len(), 1);
        assert!(msg.messages[0].ends_with("was created"));
        assert!(msg.messages[0].contains("[svc.db.sales.orders](https://catalog.test/table/svc.db.sales.orders)"));
    }

    #[test]
    fn test_update_without_diff_is_a_formatting_error() {
        let mut event = updated_event();
        event.change_description = Some(ChangeDescription::default());

        let msg = build_outgoing_message(&teams::MARKUP, &ctx(), &event);
        assert!(msg.messages.is_empty());
        assert!(matches!(
            require_messages(msg, &event),
            Err(DispatchError::Formatting { .. })
        ));
    }

    #[test]
    fn test_long_values_are_truncated() {
        let value = "x".repeat(MAX_FIELD_LENGTH + 50);
        let rendered = render_value(Some(&Value::String(value))).unwrap();
        assert!(rendered.ends_with("... (truncated)"));
        assert_eq!(rendered.len(), MAX_FIELD_LENGTH + "... (truncated)".len());
    }

    #[test]
    fn test_link_styles() {
        let base = "https://catalog.test";
        assert_eq!(
            slack::MARKUP.entity_link(base, "table", "a b"),
            "<https://catalog.test/table/a%20b|a b>"
        );
        assert_eq!(
            email::MARKUP.entity_link(base, "table", "t"),
            "<a href='https://catalog.test/table/t'>t</a>"
        );
        assert_eq!(feed::MARKUP.entity_link(base, "table", "t"), "[t](/table/t)");
    }

    #[test]
    fn test_webhook_format_kinds() {
        assert_eq!(WebhookFormat::MsTeams.destination_type(), DestinationType::MsTeams);
        assert_eq!(WebhookFormat::Generic.destination_type(), DestinationType::Webhook);
    }

    #[test]
    fn test_html_markup_escapes_values() {
        let mut event = updated_event();
        event.entity_fully_qualified_name = "svc.db.<b>".to_string();
        event.change_description = Some(ChangeDescription {
            fields_updated: vec![FieldChange {
                name: "description".to_string(),
                old_value: Some(json!("</ul>")),
                new_value: Some(json!("<script>alert('x')</script>")),
            }],
            ..Default::default()
        });

        let msg = build_outgoing_message(&email::MARKUP, &ctx(), &event);
        assert_eq!(
            msg.messages[0],
            "Updated <b>description</b>: <s>&lt;/ul&gt;</s> <b>&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt;</b>"
        );
        assert!(msg.entity_url.ends_with(">svc.db.&lt;b&gt;</a>"));

        let slack = build_outgoing_message(&slack::MARKUP, &ctx(), &event);
        assert!(slack.messages[0].contains("*<script>alert('x')</script>*"));
    }
}
