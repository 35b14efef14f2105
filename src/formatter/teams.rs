//! Microsoft Teams message cards

use serde::Serialize;

use super::{
    FormatContext, LinkStyle, Markup, MessageFormatter, build_outgoing_message, require_messages,
    test_message_text,
};
use crate::errors::DispatchResult;
use crate::types::ChangeEvent;

pub const MARKUP: Markup = Markup {
    bold_open: "**",
    bold_close: "**",
    escape_html: false,
    add_open: "**",
    add_close: "** ",
    remove_open: "~~",
    remove_close: "~~ ",
    link_style: LinkStyle::Markdown,
};

const SUMMARY: &str = "Change Event From the Catalog";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamsSection {
    pub activity_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamsMessage {
    #[serde(rename = "@type")]
    pub message_type: &'static str,
    #[serde(rename = "@context")]
    pub context: &'static str,
    pub summary: String,
    pub sections: Vec<TeamsSection>,
}

impl TeamsMessage {
    fn card(summary: String, sections: Vec<TeamsSection>) -> Self {
        Self {
            message_type: "MessageCard",
            context: "http://schema.org/extensions",
            summary,
            sections,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TeamsFormatter;

impl MessageFormatter for TeamsFormatter {
    type Message = TeamsMessage;

    fn build_entity_message(
        &self,
        ctx: &FormatContext<'_>,
        event: &ChangeEvent,
    ) -> DispatchResult<TeamsMessage> {
        let outgoing = require_messages(build_outgoing_message(&MARKUP, ctx, event), event)?;
        let sections = outgoing
            .messages
            .into_iter()
            .map(|line| TeamsSection {
                activity_title: outgoing.header.clone(),
                activity_text: Some(line),
            })
            .collect();
        Ok(TeamsMessage::card(SUMMARY.to_string(), sections))
    }

    fn build_test_message(&self, ctx: &FormatContext<'_>) -> DispatchResult<TeamsMessage> {
        Ok(TeamsMessage::card(
            test_message_text("Microsoft Teams"),
            vec![TeamsSection {
                activity_title: format!("Alert: {}", ctx.publisher_name),
                activity_text: None,
            }],
        ))
    }
}
