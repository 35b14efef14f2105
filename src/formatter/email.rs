//! Email fields for change notifications

use serde::Serialize;

use super::{
    FormatContext, LinkStyle, Markup, MessageFormatter, build_outgoing_message, html_escape,
    require_messages,
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
    link_style: LinkStyle::Html,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub user_name: String,
    pub updated_by: String,
    pub entity_url: String,
    pub change_message: Vec<String>,
}

impl EmailMessage {
    pub fn subject(&self, prefix: &str, publisher_name: &str) -> String {
        format!("{} Change Event : {}", prefix, publisher_name)
    }

    /// HTML body listing every change line; lines and the entity link arrive already escaped
    pub fn html_body(&self, publisher_name: &str) -> String {
        let mut body = String::new();
        body.push_str("<html><body>");
        body.push_str(&format!("<p>Alert: <b>{}</b></p>", html_escape(publisher_name)));
        if !self.entity_url.is_empty() {
            body.push_str(&format!("<p>{} updated {}</p>", html_escape(&self.updated_by), self.entity_url));
        }
        body.push_str("<ul>");
        for line in &self.change_message {
            body.push_str(&format!("<li>{}</li>", line));
        }
        body.push_str("</ul></body></html>");
        body
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmailFormatter;

impl MessageFormatter for EmailFormatter {
    type Message = EmailMessage;

    fn build_entity_message(
        &self,
        ctx: &FormatContext<'_>,
        event: &ChangeEvent,
    ) -> DispatchResult<EmailMessage> {
        let outgoing = require_messages(build_outgoing_message(&MARKUP, ctx, event), event)?;
        Ok(EmailMessage {
            user_name: outgoing.user_name.clone(),
            updated_by: outgoing.user_name,
            entity_url: outgoing.entity_url,
            change_message: outgoing.messages,
        })
    }

    fn build_test_message(&self, ctx: &FormatContext<'_>) -> DispatchResult<EmailMessage> {
        Ok(EmailMessage {
            user_name: "test_user".to_string(),
            updated_by: "system".to_string(),
            entity_url: String::new(),
            change_message: vec![format!(
                "This is a test alert to verify the destination configuration for alerts. Publisher: {}. If you received this message, your alert configuration is correct.",
                ctx.publisher_name
            )],
        })
    }
}
