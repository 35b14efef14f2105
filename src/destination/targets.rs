//! Secondary recipients derived from the destination category and the event

use std::collections::{BTreeSet, HashSet};

use serde_json::Value;

use crate::errors::DispatchResult;
use crate::filter::names_in;
use crate::store::RecipientDirectory;
use crate::types::{ChangeEvent, Recipient, SubscriptionCategory};

const USER_MENTION_PREFIX: &str = "<#E::user::";
const TEAM_MENTION_PREFIX: &str = "<#E::team::";

/// Recipient selection of one destination
#[derive(Debug, Clone, Copy)]
pub struct TargetRules<'a> {
    pub category: SubscriptionCategory,
    /// Names for USERS/TEAMS; literal addresses for EXTERNAL email
    pub receivers: &'a BTreeSet<String>,
    pub send_to_admins: bool,
    pub send_to_owners: bool,
    pub send_to_followers: bool,
}

/// Everyone the category and flags select, each name at most once
pub async fn resolve_recipients(
    directory: &dyn RecipientDirectory,
    rules: &TargetRules<'_>,
    event: &ChangeEvent,
) -> DispatchResult<Vec<Recipient>> {
    let mut found = Vec::new();

    match rules.category {
        SubscriptionCategory::External => {}
        SubscriptionCategory::Users => {
            for name in rules.receivers {
                found.extend(directory.user(name).await?);
            }
        }
        SubscriptionCategory::Teams => {
            for team in rules.receivers {
                found.extend(directory.team_members(team).await?);
            }
        }
        SubscriptionCategory::Admins => found.extend(directory.admins().await?),
        SubscriptionCategory::Owners => found.extend(directory.owners_of(event).await?),
        SubscriptionCategory::Followers => found.extend(directory.followers_of(event.entity_id).await?),
        SubscriptionCategory::Assignees => {
            for name in names_in(event.entity_field("task.assignees")) {
                found.extend(directory.user_or_team(&name).await?);
            }
        }
        SubscriptionCategory::Mentions => {
            let message = event.entity_field("message").and_then(Value::as_str).unwrap_or_default();
            for name in mentioned(message, USER_MENTION_PREFIX) {
                found.extend(directory.user(&name).await?);
            }
            for team in mentioned(message, TEAM_MENTION_PREFIX) {
                found.extend(directory.team_members(&team).await?);
            }
        }
    }

    if rules.send_to_admins {
        found.extend(directory.admins().await?);
    }
    if rules.send_to_owners {
        found.extend(directory.owners_of(event).await?);
    }
    if rules.send_to_followers {
        found.extend(directory.followers_of(event.entity_id).await?);
    }

    let mut seen = HashSet::new();
    found.retain(|r| seen.insert(r.name.clone()));
    Ok(found)
}

/// Names in `<#E::user::name>` style links
fn mentioned(message: &str, prefix: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = message;
    while let Some(start) = rest.find(prefix) {
        rest = &rest[start + prefix.len()..];
        let Some(end) = rest.find('>') else {
            break;
        };
        let name = &rest[..end];
        // a trailing `::field` belongs to the link, not the name
        let name = name.split("::").next().unwrap_or(name);
        if !name.is_empty() {
            names.push(name.to_string());
        }
        rest = &rest[end..];
    }
    names
}

/// Push `url` unless it is already listed
pub(crate) fn push_unique(targets: &mut Vec<String>, url: &str) {
    if !targets.iter().any(|t| t == url) {
        targets.push(url.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{DirectorySnapshot, InMemoryDirectory};
    use crate::types::{EventType, THREAD_ENTITY_TYPE};
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn recipient(name: &str) -> Recipient {
        Recipient {
            name: name.to_string(),
            email: Some(format!("{}@example.test", name)),
            ..Default::default()
        }
    }

    fn directory(entity_id: Uuid) -> InMemoryDirectory {
        InMemoryDirectory::new(DirectorySnapshot {
            users: ["alice", "bob", "carol", "dave"].iter().map(|n| recipient(n)).collect(),
            teams: HashMap::from([("data".to_string(), vec!["bob".to_string(), "carol".to_string()])]),
            admins: vec!["dave".to_string()],
            followers: HashMap::from([(entity_id, vec!["carol".to_string()])]),
        })
    }

    fn event(entity: serde_json::Value) -> ChangeEvent {
        ChangeEvent {
            id: Uuid::new_v4(),
            offset: 1,
            event_type: EventType::EntityUpdated,
            entity_type: "table".to_string(),
            entity_id: Uuid::nil(),
            entity_fully_qualified_name: "svc.db.s.orders".to_string(),
            user_name: "alice".to_string(),
            timestamp: Utc::now(),
            previous_version: None,
            current_version: None,
            change_description: None,
            entity: Some(entity),
        }
    }

    fn names(recipients: &[Recipient]) -> Vec<&str> {
        recipients.iter().map(|r| r.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_owners_and_flags_are_merged_without_duplicates() {
        let receivers = BTreeSet::new();
        let rules = TargetRules {
            category: SubscriptionCategory::Owners,
            receivers: &receivers,
            send_to_admins: true,
            send_to_owners: true,
            send_to_followers: true,
        };
        let event = event(json!({ "owners": [{ "name": "data", "type": "team" }] }));

        let found = resolve_recipients(&directory(Uuid::nil()), &rules, &event).await.unwrap();
        assert_eq!(names(&found), vec!["bob", "carol", "dave"]);
    }

    #[tokio::test]
    async fn test_external_selects_nobody() {
        let receivers = BTreeSet::from(["ops@example.test".to_string()]);
        let rules = TargetRules {
            category: SubscriptionCategory::External,
            receivers: &receivers,
            send_to_admins: false,
            send_to_owners: false,
            send_to_followers: false,
        };
        let found = resolve_recipients(&directory(Uuid::nil()), &rules, &event(json!({}))).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_assignees_and_mentions_come_from_the_thread() {
        let receivers = BTreeSet::new();
        let mut thread = event(json!({
            "message": "ping <#E::user::alice> and <#E::team::data>",
            "task": { "assignees": [{ "name": "dave" }] }
        }));
        thread.entity_type = THREAD_ENTITY_TYPE.to_string();

        let assignees = TargetRules {
            category: SubscriptionCategory::Assignees,
            receivers: &receivers,
            send_to_admins: false,
            send_to_owners: false,
            send_to_followers: false,
        };
        let found = resolve_recipients(&directory(Uuid::nil()), &assignees, &thread).await.unwrap();
        assert_eq!(names(&found), vec!["dave"]);

        let mentions = TargetRules {
            category: SubscriptionCategory::Mentions,
            ..assignees
        };
        let found = resolve_recipients(&directory(Uuid::nil()), &mentions, &thread).await.unwrap();
        assert_eq!(names(&found), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_mention_parsing() {
        assert_eq!(
            mentioned("<#E::user::a> x <#E::user::b::displayName> <#E::user::", USER_MENTION_PREFIX),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(mentioned("no links", USER_MENTION_PREFIX).is_empty());
    }
}
