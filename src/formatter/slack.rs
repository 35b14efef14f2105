//! Slack block messages

use serde::Serialize;

use super::{
    FormatContext, LinkStyle, Markup, MessageFormatter, build_outgoing_message, require_messages,
    test_message_text,
};
use crate::errors::DispatchResult;
use crate::types::ChangeEvent;

pub const MARKUP: Markup = Markup {
    bold_open: "*",
    bold_close: "*",
    escape_html: false,
    add_open: "*",
    add_close: "*",
    remove_open: "~",
    remove_close: "~",
    link_style: LinkStyle::Angle,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlackText {
    #[serde(rename = "type")]
    pub text_type: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SlackBlock {
    Header { text: SlackText },
    Section { text: SlackText },
    Divider,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlackMessage {
    /// Fallback shown in notifications
    pub text: String,
    pub blocks: Vec<SlackBlock>,
}

fn mrkdwn(text: String) -> SlackText {
    SlackText {
        text_type: "mrkdwn",
        text,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SlackFormatter;

impl MessageFormatter for SlackFormatter {
    type Message = SlackMessage;

    fn build_entity_message(
        &self,
        ctx: &FormatContext<'_>,
        event: &ChangeEvent,
    ) -> DispatchResult<SlackMessage> {
        let outgoing = require_messages(build_outgoing_message(&MARKUP, ctx, event), event)?;

        let mut blocks = vec![
            SlackBlock::Section {
                text: mrkdwn(outgoing.header.clone()),
            },
            SlackBlock::Divider,
        ];
        blocks.extend(
            outgoing
                .messages
                .into_iter()
                .map(|line| SlackBlock::Section { text: mrkdwn(line) }),
        );

        Ok(SlackMessage {
            text: outgoing.header,
            blocks,
        })
    }

    fn build_test_message(&self, ctx: &FormatContext<'_>) -> DispatchResult<SlackMessage> {
        let text = test_message_text("Slack");
        Ok(SlackMessage {
            text: text.clone(),
            blocks: vec![
                SlackBlock::Header {
                    text: SlackText {
                        text_type: "plain_text",
                        text: format!("Alert: {}", ctx.publisher_name),
                    },
                },
                SlackBlock::Section { text: mrkdwn(text) },
            ],
        })
    }
}
