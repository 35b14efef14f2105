//! Subscription filtering rules
//!
//! Decides whether a change event is relevant to a subscription: first by
//! resource (entity type), then by the include/exclude rule chains.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::types::{ChangeEvent, EventType, TEST_CASE_ENTITY_TYPE, TEST_SUITE_ENTITY_TYPE};

const ALL_RESOURCES: &str = "all";
const THREAD_RESOURCES: [&str; 3] = ["announcement", "task", "conversation"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    #[default]
    Include,
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrefixCondition {
    And,
    Or,
}

/// Typed predicate over a change event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "camelCase")]
pub enum FilterCondition {
    MatchAnyEventType(Vec<EventType>),
    /// Exact fully-qualified name, or any name nested under it
    MatchAnyEntityFqn(Vec<String>),
    MatchAnyOwner(Vec<String>),
    MatchUpdatedBy(Vec<String>),
    MatchAnyFieldChange(Vec<String>),
    MatchAnyDomain(Vec<String>),
}

impl FilterCondition {
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            FilterCondition::MatchAnyEventType(types) => types.contains(&event.event_type),
            FilterCondition::MatchAnyEntityFqn(names) => names.iter().any(|name| {
                let fqn = &event.entity_fully_qualified_name;
                fqn == name || fqn.starts_with(&format!("{name}."))
            }),
            FilterCondition::MatchAnyOwner(owners) => {
                entity_owner_names(event).iter().any(|owner| owners.contains(owner))
            }
            FilterCondition::MatchUpdatedBy(users) => users.contains(&event.user_name),
            FilterCondition::MatchAnyFieldChange(fields) => event
                .change_description
                .as_ref()
                .map(|cd| cd.field_names().any(|name| fields.iter().any(|f| f == name)))
                .unwrap_or(false),
            FilterCondition::MatchAnyDomain(domains) => {
                entity_domain_names(event).iter().any(|domain| domains.contains(domain))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilterRule {
    pub name: String,
    #[serde(default)]
    pub effect: Effect,
    /// Ignored on the first rule of a chain; AND when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_condition: Option<PrefixCondition>,
    pub condition: FilterCondition,
}

impl EventFilterRule {
    fn evaluate(&self, event: &ChangeEvent) -> bool {
        let matched = self.condition.matches(event);
        match self.effect {
            Effect::Include => matched,
            Effect::Exclude => !matched,
        }
    }
}

/// Evaluate a rule chain; AND binds tighter than OR, an empty chain passes
pub fn evaluate_rule_chain(rules: &[EventFilterRule], event: &ChangeEvent) -> bool {
    let mut rules = rules.iter();
    let Some(first) = rules.next() else {
        return true;
    };

    let mut any_group = false;
    let mut group = first.evaluate(event);
    for rule in rules {
        let value = rule.evaluate(event);
        match rule.prefix_condition.unwrap_or(PrefixCondition::And) {
            PrefixCondition::And => group = group && value,
            PrefixCondition::Or => {
                any_group = any_group || group;
                group = value;
            }
        }
    }
    any_group || group
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteringRules {
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub rules: Vec<EventFilterRule>,
    #[serde(default)]
    pub actions: Vec<EventFilterRule>,
}

impl FilteringRules {
    /// Resource check on entity type, before any rule is evaluated
    pub fn matches_resource(&self, event: &ChangeEvent) -> bool {
        let Some(primary) = self.resources.first() else {
            return true;
        };

        if self.resources.len() == 1 && primary == ALL_RESOURCES {
            return true;
        }

        if event.is_thread() && THREAD_RESOURCES.contains(&primary.as_str()) {
            return event
                .entity_field("type")
                .and_then(Value::as_str)
                .map(|thread_type| thread_type.eq_ignore_ascii_case(primary))
                .unwrap_or(false);
        }

        if primary == TEST_SUITE_ENTITY_TYPE {
            return event.entity_type == TEST_SUITE_ENTITY_TYPE
                || event.entity_type == TEST_CASE_ENTITY_TYPE;
        }

        self.resources.iter().any(|r| r == &event.entity_type)
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.matches_resource(event)
            && evaluate_rule_chain(&self.rules, event)
            && evaluate_rule_chain(&self.actions, event)
    }
}

/// Subscription-level check; a subscription without rules receives everything
pub fn should_dispatch(rules: Option<&FilteringRules>, event: &ChangeEvent) -> bool {
    let allowed = rules.map(|r| r.matches(event)).unwrap_or(true);
    debug!(
        event_id = %event.id,
        entity_type = %event.entity_type,
        allowed,
        "Evaluated subscription filter"
    );
    allowed
}

/// Owner names from the entity snapshot (`owners[]` or a single `owner`)
pub(crate) fn entity_owner_names(event: &ChangeEvent) -> Vec<String> {
    let mut names = names_in(event.entity_field("owners"));
    names.extend(names_in(event.entity_field("owner")));
    names
}

fn entity_domain_names(event: &ChangeEvent) -> Vec<String> {
    let mut names = Vec::new();
    for key in ["domain", "domains"] {
        let Some(value) = event.entity_field(key) else {
            continue;
        };
        let refs: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for r in refs {
            for field in ["fullyQualifiedName", "name"] {
                if let Some(name) = r.get(field).and_then(Value::as_str) {
                    names.push(name.to_string());
                }
            }
        }
    }
    names
}

/// Collect `name` fields from an entity reference or a list of them
pub(crate) fn names_in(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
        Some(item @ Value::Object(_)) => item
            .get("name")
            .and_then(Value::as_str)
            .map(|n| vec![n.to_string()])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeDescription, FieldChange, THREAD_ENTITY_TYPE};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn event(entity_type: &str, fqn: &str) -> ChangeEvent {
        ChangeEvent {
            id: Uuid::new_v4(),
            offset: 1,
            event_type: EventType::EntityUpdated,
            entity_type: entity_type.to_string(),
            entity_id: Uuid::new_v4(),
            entity_fully_qualified_name: fqn.to_string(),
            user_name: "alice".to_string(),
            timestamp: Utc::now(),
            previous_version: None,
            current_version: None,
            change_description: Some(ChangeDescription {
                fields_updated: vec![FieldChange {
                    name: "description".to_string(),
                    old_value: Some(json!("old")),
                    new_value: Some(json!("new")),
                }],
                ..Default::default()
            }),
            entity: Some(json!({
                "owners": [{ "name": "data-team" }],
                "domain": { "name": "Sales", "fullyQualifiedName": "Sales" }
            })),
        }
    }

    fn rule(condition: FilterCondition, effect: Effect, prefix: Option<PrefixCondition>) -> EventFilterRule {
        EventFilterRule {
            name: "rule".to_string(),
            effect,
            prefix_condition: prefix,
            condition,
        }
    }

    #[test]
    fn test_resources_all_and_specific() {
        let table = event("table", "svc.db.s.orders");
        let all = FilteringRules {
            resources: vec!["all".to_string()],
            ..Default::default()
        };
        assert!(all.matches(&table));

        let topics = FilteringRules {
            resources: vec!["topic".to_string()],
            ..Default::default()
        };
        assert!(!topics.matches(&table));
    }

    #[test]
    fn test_test_suite_resource_covers_test_cases() {
        let rules = FilteringRules {
            resources: vec![TEST_SUITE_ENTITY_TYPE.to_string()],
            ..Default::default()
        };
        assert!(rules.matches(&event(TEST_CASE_ENTITY_TYPE, "suite.case")));
        assert!(!rules.matches(&event("table", "t")));
    }

    #[test]
    fn test_thread_resource_matches_thread_type() {
        let mut thread = event(THREAD_ENTITY_TYPE, "thread");
        thread.entity = Some(json!({ "type": "Task" }));

        let tasks = FilteringRules {
            resources: vec!["task".to_string()],
            ..Default::default()
        };
        let announcements = FilteringRules {
            resources: vec!["announcement".to_string()],
            ..Default::default()
        };
        assert!(tasks.matches(&thread));
        assert!(!announcements.matches(&thread));
    }

    #[test]
    fn test_rule_chain_precedence() {
        let ev = event("table", "svc.db.s.orders");
        // false AND true OR true => (false && true) || true
        let chain = vec![
            rule(FilterCondition::MatchUpdatedBy(vec!["bob".into()]), Effect::Include, None),
            rule(FilterCondition::MatchAnyOwner(vec!["data-team".into()]), Effect::Include, Some(PrefixCondition::And)),
            rule(FilterCondition::MatchAnyDomain(vec!["Sales".into()]), Effect::Include, Some(PrefixCondition::Or)),
        ];
        assert!(evaluate_rule_chain(&chain, &ev));

        // true OR true AND false => true || (true && false)
        let chain = vec![
            rule(FilterCondition::MatchUpdatedBy(vec!["alice".into()]), Effect::Include, None),
            rule(FilterCondition::MatchAnyEntityFqn(vec!["svc.db".into()]), Effect::Include, Some(PrefixCondition::Or)),
            rule(FilterCondition::MatchAnyFieldChange(vec!["tags".into()]), Effect::Include, Some(PrefixCondition::And)),
        ];
        assert!(evaluate_rule_chain(&chain, &ev));
    }

    #[test]
    fn test_exclude_effect_negates() {
        let ev = event("table", "svc.db.s.orders");
        let rules = FilteringRules {
            resources: vec!["table".to_string()],
            rules: vec![rule(
                FilterCondition::MatchUpdatedBy(vec!["alice".into()]),
                Effect::Exclude,
                None,
            )],
            actions: vec![],
        };
        assert!(!rules.matches(&ev));
    }

    #[test]
    fn test_fqn_prefix_requires_segment_boundary() {
        let ev = event("table", "svc.db.s.orders");
        assert!(FilterCondition::MatchAnyEntityFqn(vec!["svc.db".into()]).matches(&ev));
        assert!(!FilterCondition::MatchAnyEntityFqn(vec!["svc.d".into()]).matches(&ev));
    }

    #[test]
    fn test_rules_deserialize_from_catalog_json() {
        let rules: FilteringRules = serde_json::from_value(json!({
            "resources": ["table"],
            "rules": [{
                "name": "filterByEventType",
                "effect": "INCLUDE",
                "condition": { "type": "matchAnyEventType", "values": ["ENTITY_UPDATED"] }
            }]
        }))
        .unwrap();

        assert!(rules.matches(&event("table", "x")));
        assert!(should_dispatch(None, &event("table", "x")));
    }
}
