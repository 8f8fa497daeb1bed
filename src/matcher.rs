//! Rule matching.
//!
//! Selects at most one rule for an inbound event: filter by active flag,
//! platform, and trigger, apply keyword semantics, then pick the highest
//! priority. Ties break to the oldest rule so edits keep the outcome stable.

use std::str::FromStr;

use crate::models::rule::Model as RuleModel;
use crate::normalization::{InboundEvent, Platform, TriggerKind};

/// Outcome of rule selection: the winning rule and the keyword that fired it.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch<'a> {
    pub rule: &'a RuleModel,
    pub keyword: Option<String>,
}

/// Select the rule that fires for `event`, if any.
///
/// Rules whose stored platform or trigger no longer parses are skipped with a
/// warning rather than failing the whole event.
pub fn select_rule<'a>(event: &InboundEvent, rules: &'a [RuleModel]) -> Option<RuleMatch<'a>> {
    let mut best: Option<RuleMatch<'a>> = None;

    for rule in rules {
        if !rule.is_active {
            continue;
        }

        let platform = match Platform::from_str(&rule.platform) {
            Ok(platform) => platform,
            Err(err) => {
                tracing::warn!(rule_id = %rule.id, error = %err, "Rule has unrecognized platform");
                continue;
            }
        };
        let trigger = match TriggerKind::from_str(&rule.trigger_type) {
            Ok(trigger) => trigger,
            Err(err) => {
                tracing::warn!(rule_id = %rule.id, error = %err, "Rule has unrecognized trigger");
                continue;
            }
        };

        if platform != event.platform || trigger != event.trigger {
            continue;
        }

        let keyword = if trigger.is_keyword_based() {
            match matching_keyword(rule, &event.text) {
                Some(keyword) => Some(keyword),
                None => continue,
            }
        } else {
            None
        };

        let candidate = RuleMatch { rule, keyword };
        best = Some(match best {
            None => candidate,
            Some(current) => {
                if candidate.rule.priority > current.rule.priority
                    || (candidate.rule.priority == current.rule.priority
                        && candidate.rule.created_at < current.rule.created_at)
                {
                    candidate
                } else {
                    current
                }
            }
        });
    }

    best
}

/// First keyword in the rule's ordered list that matches the event text.
fn matching_keyword(rule: &RuleModel, text: &str) -> Option<String> {
    let haystack = text.to_lowercase();
    let exact = rule.keyword_match == "exact";

    rule.keywords
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|keyword| keyword.as_str())
        .find(|keyword| {
            let needle = keyword.to_lowercase();
            if needle.is_empty() {
                return false;
            }
            if exact {
                haystack.trim() == needle
            } else {
                haystack.contains(&needle)
            }
        })
        .map(str::to_string)
}

/// Resolve the reply template with data available at match time.
pub fn resolve_reply(template: &str, sender_username: Option<&str>) -> String {
    template.replace("{{username}}", sender_username.unwrap_or("there"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use uuid::Uuid;

    fn keyword_rule(keywords: &[&str], priority: i32, created_minutes_ago: i64) -> RuleModel {
        let created = (Utc::now() - Duration::minutes(created_minutes_ago)).fixed_offset();
        RuleModel {
            id: Uuid::new_v4(),
            creator_id: Uuid::new_v4(),
            platform: "instagram".to_string(),
            trigger_type: "keyword_comment".to_string(),
            keywords: json!(keywords),
            keyword_match: "contains".to_string(),
            reply_text: "DM sent!".to_string(),
            reply_attachment_id: None,
            requires_follow: false,
            cooldown_hours: 24,
            is_active: true,
            priority,
            total_sent: 0,
            total_failed: 0,
            created_at: created,
            updated_at: created,
        }
    }

    fn comment_event(text: &str) -> InboundEvent {
        InboundEvent {
            platform: Platform::Instagram,
            trigger: TriggerKind::KeywordComment,
            platform_event_id: "c-1".to_string(),
            sender_id: "u-1".to_string(),
            sender_username: Some("jane".to_string()),
            text: text.to_string(),
            post_id: Some("m-1".to_string()),
            comment_id: Some("c-1".to_string()),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn matches_keyword_case_insensitively() {
        let rules = vec![keyword_rule(&["price"], 0, 0)];
        let event = comment_event("What's the PRICE of this?");

        let matched = select_rule(&event, &rules).expect("rule matches");
        assert_eq!(matched.keyword.as_deref(), Some("price"));
    }

    #[test]
    fn exact_mode_requires_whole_text() {
        let mut rule = keyword_rule(&["price"], 0, 0);
        rule.keyword_match = "exact".to_string();
        let rules = vec![rule];

        assert!(select_rule(&comment_event("price please"), &rules).is_none());
        assert!(select_rule(&comment_event("  Price "), &rules).is_some());
    }

    #[test]
    fn no_match_returns_none() {
        let rules = vec![keyword_rule(&["price"], 0, 0)];
        assert!(select_rule(&comment_event("beautiful shot!"), &rules).is_none());
    }

    #[test]
    fn higher_priority_wins() {
        let low = keyword_rule(&["price"], 1, 0);
        let high = keyword_rule(&["price"], 5, 0);
        let high_id = high.id;
        let rules = vec![low, high];

        let matched = select_rule(&comment_event("price?"), &rules).expect("rule matches");
        assert_eq!(matched.rule.id, high_id);
    }

    #[test]
    fn priority_tie_breaks_to_oldest() {
        let newer = keyword_rule(&["price"], 5, 1);
        let older = keyword_rule(&["price"], 5, 60);
        let older_id = older.id;
        let rules = vec![newer, older];

        let matched = select_rule(&comment_event("price?"), &rules).expect("rule matches");
        assert_eq!(matched.rule.id, older_id);
    }

    #[test]
    fn inactive_rules_never_fire() {
        let mut rule = keyword_rule(&["price"], 100, 0);
        rule.is_active = false;
        let active = keyword_rule(&["price"], 1, 0);
        let active_id = active.id;
        let rules = vec![rule, active];

        let matched = select_rule(&comment_event("price?"), &rules).expect("rule matches");
        assert_eq!(matched.rule.id, active_id);
    }

    #[test]
    fn platform_and_trigger_must_both_match() {
        let mut dm_rule = keyword_rule(&["price"], 0, 0);
        dm_rule.trigger_type = "keyword_dm".to_string();
        let mut whatsapp_rule = keyword_rule(&["price"], 0, 0);
        whatsapp_rule.platform = "whatsapp".to_string();
        let rules = vec![dm_rule, whatsapp_rule];

        assert!(select_rule(&comment_event("price?"), &rules).is_none());
    }

    #[test]
    fn unrecognized_rule_strings_are_skipped() {
        let mut rule = keyword_rule(&["price"], 0, 0);
        rule.trigger_type = "reaction".to_string();
        let rules = vec![rule];

        assert!(select_rule(&comment_event("price?"), &rules).is_none());
    }

    #[test]
    fn follower_rules_match_without_keywords() {
        let mut rule = keyword_rule(&[], 0, 0);
        rule.trigger_type = "new_follower".to_string();
        let rules = vec![rule];

        let event = InboundEvent {
            trigger: TriggerKind::NewFollower,
            text: String::new(),
            ..comment_event("")
        };

        let matched = select_rule(&event, &rules).expect("rule matches");
        assert_eq!(matched.keyword, None);
    }

    #[test]
    fn resolve_reply_substitutes_username() {
        assert_eq!(
            resolve_reply("Hi {{username}}, link is out!", Some("jane")),
            "Hi jane, link is out!"
        );
        assert_eq!(
            resolve_reply("Hi {{username}}!", None),
            "Hi there!"
        );
    }
}
