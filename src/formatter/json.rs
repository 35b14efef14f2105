//! Plain JSON payloads for generic webhooks

use serde::Serialize;

use super::{FormatContext, MessageFormatter, test_message_text};
use crate::errors::DispatchResult;
use crate::types::ChangeEvent;

/// Generic webhook payload: the raw change event, or a diagnostic text
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonMessage {
    Event(ChangeEvent),
    Test { message: String },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatter;

impl MessageFormatter for JsonFormatter {
    type Message = JsonMessage;

    fn build_entity_message(
        &self,
        _ctx: &FormatContext<'_>,
        event: &ChangeEvent,
    ) -> DispatchResult<JsonMessage> {
        Ok(JsonMessage::Event(event.clone()))
    }

    fn build_test_message(&self, _ctx: &FormatContext<'_>) -> DispatchResult<JsonMessage> {
        Ok(JsonMessage::Test {
            message: test_message_text("webhook"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::test_support::{ctx, updated_event};

    #[test]
    fn test_generic_body_is_the_change_event() {
        let event = updated_event();
        let value = serde_json::to_value(JsonFormatter.build_entity_message(&ctx(), &event).unwrap()).unwrap();

        assert_eq!(value["entityFullyQualifiedName"], "svc.db.sales.orders");
        assert_eq!(value["eventType"], "ENTITY_UPDATED");
        let round: ChangeEvent = serde_json::from_value(value).unwrap();
        assert_eq!(round, event);
    }

    #[test]
    fn test_generic_test_body() {
        let value = serde_json::to_value(JsonFormatter.build_test_message(&ctx()).unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({ "message": test_message_text("webhook") }));
    }
}
