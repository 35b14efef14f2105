//! Activity feed thread messages

use super::{FormatContext, LinkStyle, Markup, MessageFormatter, build_outgoing_message};
use crate::errors::DispatchResult;
use crate::types::ChangeEvent;

pub const MARKUP: Markup = Markup {
    bold_open: "**",
    bold_close: "**",
    escape_html: false,
    add_open: "<span class=\"diff-added\">",
    add_close: "</span>",
    remove_open: "<span class=\"diff-removed\">",
    remove_close: "</span>",
    link_style: LinkStyle::RelativeMarkdown,
};

/// Renders one thread message per change line; an empty result means "post nothing"
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedFormatter;

impl MessageFormatter for FeedFormatter {
    type Message = Vec<String>;

    fn build_entity_message(
        &self,
        ctx: &FormatContext<'_>,
        event: &ChangeEvent,
    ) -> DispatchResult<Vec<String>> {
        Ok(build_outgoing_message(&MARKUP, ctx, event)
            .messages
            .into_iter()
            .filter(|line| !line.trim().is_empty())
            .collect())
    }

    fn build_test_message(&self, _ctx: &FormatContext<'_>) -> DispatchResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// `<#E::type::fqn>` link the catalog uses to attach a thread to an entity
pub fn entity_link(event: &ChangeEvent) -> String {
    format!("<#E::{}::{}>", event.entity_type, event.entity_fully_qualified_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::test_support::{ctx, updated_event};
    use crate::types::ChangeDescription;

    #[test]
    fn test_feed_lines_use_diff_spans() {
        let lines = FeedFormatter.build_entity_message(&ctx(), &updated_event()).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1],
            "Updated **description**: <span class=\"diff-removed\">old text</span> <span class=\"diff-added\">new text</span>"
        );
    }

    #[test]
    fn test_feed_empty_diff_renders_nothing() {
        let mut event = updated_event();
        event.change_description = Some(ChangeDescription::default());
        assert!(FeedFormatter.build_entity_message(&ctx(), &event).unwrap().is_empty());
    }

    #[test]
    fn test_entity_link() {
        assert_eq!(entity_link(&updated_event()), "<#E::table::svc.db.sales.orders>");
    }
}
