//! Google Chat cardsV2 messages

use serde::Serialize;

use super::{
    FormatContext, LinkStyle, Markup, MessageFormatter, build_outgoing_message, require_messages,
    test_message_text,
};
use crate::errors::DispatchResult;
use crate::types::ChangeEvent;

pub const MARKUP: Markup = Markup {
    bold_open: "<b>",
    bold_close: "</b>",
    escape_html: true,
    add_open: "<b>",
    add_close: "</b>",
    remove_open: "<s>",
    remove_close: "</s>",
    link_style: LinkStyle::Angle,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextParagraph {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    pub text_paragraph: TextParagraph,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub widgets: Vec<Widget>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardHeader {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Card {
    pub header: CardHeader,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardV2 {
    pub card: Card,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GChatMessage {
    pub text: String,
    #[serde(rename = "cardsV2")]
    pub cards_v2: Vec<CardV2>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GChatFormatter;

impl MessageFormatter for GChatFormatter {
    type Message = GChatMessage;

    fn build_entity_message(
        &self,
        ctx: &FormatContext<'_>,
        event: &ChangeEvent,
    ) -> DispatchResult<GChatMessage> {
        let outgoing = require_messages(build_outgoing_message(&MARKUP, ctx, event), event)?;
        let widgets = outgoing
            .messages
            .into_iter()
            .map(|text| Widget {
                text_paragraph: TextParagraph { text },
            })
            .collect();

        Ok(GChatMessage {
            text: "Change Event from the Catalog".to_string(),
            cards_v2: vec![CardV2 {
                card: Card {
                    header: CardHeader {
                        title: outgoing.header,
                        subtitle: None,
                    },
                    sections: vec![Section { widgets }],
                },
            }],
        })
    }

    fn build_test_message(&self, ctx: &FormatContext<'_>) -> DispatchResult<GChatMessage> {
        Ok(GChatMessage {
            text: test_message_text("GChat"),
            cards_v2: vec![CardV2 {
                card: Card {
                    header: CardHeader {
                        title: format!("Alert: {}", ctx.publisher_name),
                        subtitle: Some("GChat destination test successful.".to_string()),
                    },
                    sections: vec![Section { widgets: vec![] }],
                },
            }],
        })
    }
}
