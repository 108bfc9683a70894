use uuid::Uuid;

use crate::envelope::TriageEnvelope;
use crate::rule::{DomainMatch, HeaderOp, RuleCondition, TriageAction, TriageRule};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriageDecision {
    pub action: TriageAction,
    pub target_butler: Option<String>,
    pub bypasses_llm: bool,
    pub matched_rule_id: Option<Uuid>,
}

impl TriageDecision {
    fn pass_through() -> Self {
        TriageDecision {
            action: TriageAction::PassThrough,
            target_butler: None,
            bypasses_llm: false,
            matched_rule_id: None,
        }
    }

    fn from_rule(rule: &TriageRule) -> Self {
        TriageDecision {
            action: rule.action,
            target_butler: rule.target_butler.clone(),
            bypasses_llm: rule.action.bypasses_llm(),
            matched_rule_id: Some(rule.id),
        }
    }

    fn thread_affinity(target_butler: &str) -> Self {
        TriageDecision {
            action: TriageAction::RouteTo,
            target_butler: Some(target_butler.to_string()),
            bypasses_llm: true,
            matched_rule_id: None,
        }
    }
}

/// Evaluates pre-classification for one inbound message (spec §4.G).
///
/// `thread_affinity` is the butler already handling this envelope's
/// `thread_id`, if the caller has one on record; it short-circuits rule
/// iteration entirely so a conversation never splits mid-thread. Rules are
/// walked in the order the caller hands them in — the caller is the one
/// that knows the ordering contract (priority ascending, ties broken by
/// earlier `created_at`) and pre-sorts accordingly; this function does not
/// re-sort. First matching rule wins. A rule whose condition is malformed
/// or whose type this build doesn't recognize is skipped rather than
/// treated as a match or an error — triage must never block delivery.
/// `pass_through` is the fallback when nothing matches.
pub fn evaluate_triage(
    rules: &[TriageRule],
    envelope: &TriageEnvelope,
    thread_affinity: Option<&str>,
) -> TriageDecision {
    if let Some(target) = thread_affinity {
        return TriageDecision::thread_affinity(target);
    }

    for rule in rules {
        if condition_matches(&rule.condition, envelope) {
            return TriageDecision::from_rule(rule);
        }
    }

    TriageDecision::pass_through()
}

fn condition_matches(condition: &RuleCondition, envelope: &TriageEnvelope) -> bool {
    match condition {
        RuleCondition::SenderDomain { domain, match_kind } => {
            sender_domain_matches(&envelope.sender_address, domain, *match_kind)
        }
        RuleCondition::SenderAddress { address } => {
            envelope.sender_address == address.to_lowercase()
        }
        RuleCondition::HeaderCondition { header, op, value } => {
            header_matches(&envelope.headers, header, *op, value.as_deref())
        }
        RuleCondition::MimeType { pattern } => {
            envelope.mime_types.iter().any(|mt| mime_matches(mt, pattern))
        }
    }
}

fn sender_domain_matches(sender_address: &str, domain: &str, match_kind: DomainMatch) -> bool {
    let domain = domain.to_lowercase();
    let Some((_, sender_domain)) = sender_address.rsplit_once('@') else {
        return false;
    };
    match match_kind {
        DomainMatch::Exact => sender_domain == domain,
        DomainMatch::Suffix => {
            sender_domain == domain || sender_domain.ends_with(&format!(".{domain}"))
        }
    }
}

fn header_matches(
    headers: &[(String, String)],
    header_name: &str,
    op: HeaderOp,
    expected: Option<&str>,
) -> bool {
    let found = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(header_name));

    match op {
        HeaderOp::Present => found.is_some(),
        HeaderOp::Equals => match (found, expected) {
            (Some((_, actual)), Some(expected)) => {
                actual.trim().eq_ignore_ascii_case(expected.trim())
            }
            _ => false,
        },
        HeaderOp::Contains => match (found, expected) {
            (Some((_, actual)), Some(expected)) => {
                actual.to_lowercase().contains(&expected.to_lowercase())
            }
            _ => false,
        },
    }
}

fn mime_matches(mime_type: &str, pattern: &str) -> bool {
    let mime_type = mime_type.to_lowercase();
    let pattern = pattern.to_lowercase();
    if let Some(prefix) = pattern.strip_suffix("/*") {
        mime_type
            .split_once('/')
            .map(|(type_, _)| type_ == prefix)
            .unwrap_or(false)
    } else {
        mime_type == pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn envelope_from(sender: &str) -> TriageEnvelope {
        TriageEnvelope {
            sender_address: sender.to_string(),
            source_channel: "email".to_string(),
            headers: vec![("x-priority".to_string(), "high".to_string())],
            mime_types: vec!["text/plain".to_string()],
            thread_id: None,
        }
    }

    fn rule(condition: RuleCondition, action: TriageAction, priority: i32) -> TriageRule {
        TriageRule {
            id: Uuid::new_v4(),
            butler_name: "switchboard".to_string(),
            condition,
            action,
            target_butler: if matches!(action, TriageAction::RouteTo) {
                Some("finance".to_string())
            } else {
                None
            },
            priority,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn exact_domain_rejects_subdomain() {
        let r = rule(
            RuleCondition::SenderDomain { domain: "delta.com".to_string(), match_kind: DomainMatch::Exact },
            TriageAction::Skip,
            0,
        );
        let matched = evaluate_triage(&[r], &envelope_from("alerts@mail.delta.com"), None);
        assert_eq!(matched.action, TriageAction::PassThrough);

        let r2 = rule(
            RuleCondition::SenderDomain { domain: "delta.com".to_string(), match_kind: DomainMatch::Exact },
            TriageAction::Skip,
            0,
        );
        let matched2 = evaluate_triage(&[r2], &envelope_from("ops@delta.com"), None);
        assert_eq!(matched2.action, TriageAction::Skip);
    }

    #[test]
    fn suffix_domain_matches_subdomain_but_not_lookalike() {
        let r = rule(
            RuleCondition::SenderDomain { domain: "delta.com".to_string(), match_kind: DomainMatch::Suffix },
            TriageAction::Skip,
            0,
        );
        let matched = evaluate_triage(&[r.clone()], &envelope_from("alerts@mail.delta.com"), None);
        assert_eq!(matched.action, TriageAction::Skip);

        let matched2 = evaluate_triage(&[r], &envelope_from("user@notdelta.com"), None);
        assert_eq!(matched2.action, TriageAction::PassThrough);
    }

    #[test]
    fn sender_address_match_is_case_insensitive() {
        let r = rule(
            RuleCondition::SenderAddress { address: "Ops@Delta.com".to_string() },
            TriageAction::MetadataOnly,
            0,
        );
        let matched = evaluate_triage(&[r], &envelope_from("ops@delta.com"), None);
        assert_eq!(matched.action, TriageAction::MetadataOnly);
    }

    #[test]
    fn header_present_vs_absent() {
        let present = rule(
            RuleCondition::HeaderCondition { header: "x-priority".to_string(), op: HeaderOp::Present, value: None },
            TriageAction::LowPriorityQueue,
            0,
        );
        let matched = evaluate_triage(&[present], &envelope_from("a@b.com"), None);
        assert_eq!(matched.action, TriageAction::LowPriorityQueue);

        let absent = rule(
            RuleCondition::HeaderCondition { header: "x-missing".to_string(), op: HeaderOp::Present, value: None },
            TriageAction::LowPriorityQueue,
            0,
        );
        let matched2 = evaluate_triage(&[absent], &envelope_from("a@b.com"), None);
        assert_eq!(matched2.action, TriageAction::PassThrough);
    }

    #[test]
    fn mime_wildcard_matches_type_prefix_only() {
        let mut env = envelope_from("a@b.com");
        env.mime_types = vec!["image/png".to_string()];

        let wildcard = rule(
            RuleCondition::MimeType { pattern: "image/*".to_string() },
            TriageAction::MetadataOnly,
            0,
        );
        let matched = evaluate_triage(&[wildcard], &env, None);
        assert_eq!(matched.action, TriageAction::MetadataOnly);

        let exact_mismatch = rule(
            RuleCondition::MimeType { pattern: "image/jpeg".to_string() },
            TriageAction::MetadataOnly,
            0,
        );
        let matched2 = evaluate_triage(&[exact_mismatch], &env, None);
        assert_eq!(matched2.action, TriageAction::PassThrough);
    }

    #[test]
    fn thread_affinity_short_circuits_rule_iteration() {
        let skip_everything = rule(
            RuleCondition::SenderAddress { address: "a@b.com".to_string() },
            TriageAction::Skip,
            100,
        );
        let matched = evaluate_triage(&[skip_everything], &envelope_from("a@b.com"), Some("finance"));
        assert_eq!(matched.action, TriageAction::RouteTo);
        assert_eq!(matched.target_butler.as_deref(), Some("finance"));
        assert!(matched.bypasses_llm);
    }

    #[test]
    fn first_matching_rule_in_caller_order_wins_regardless_of_priority() {
        // The caller, not this function, is responsible for sorting by
        // priority ascending (ties by created_at ascending). Given two
        // rules that both match, the one listed first wins even though its
        // priority number is higher — evaluate_triage must not re-sort.
        let now = Utc::now();
        let mut first = rule(
            RuleCondition::SenderAddress { address: "a@b.com".to_string() },
            TriageAction::MetadataOnly,
            10,
        );
        first.created_at = now;
        let mut second = rule(
            RuleCondition::SenderAddress { address: "a@b.com".to_string() },
            TriageAction::Skip,
            0,
        );
        second.created_at = now + Duration::seconds(5);

        let matched = evaluate_triage(&[first, second], &envelope_from("a@b.com"), None);
        assert_eq!(matched.action, TriageAction::MetadataOnly);
    }

    #[test]
    fn lower_priority_rule_listed_first_wins_over_later_higher_priority_rule() {
        // Mirrors the exact-address vs. domain-suffix scenario: a lower
        // priority number, pre-sorted ahead by the caller, still wins
        // because it comes first in the slice.
        let exact_address_first = rule(
            RuleCondition::SenderAddress { address: "vip@example.com".to_string() },
            TriageAction::PassThrough,
            5,
        );
        let domain_suffix_second = rule(
            RuleCondition::SenderDomain { domain: "example.com".to_string(), match_kind: DomainMatch::Suffix },
            TriageAction::RouteTo,
            10,
        );

        let matched = evaluate_triage(
            &[exact_address_first, domain_suffix_second],
            &envelope_from("vip@example.com"),
            None,
        );
        assert_eq!(matched.action, TriageAction::PassThrough);
    }

    #[test]
    fn unknown_rule_type_is_skipped_not_erroring() {
        // A header rule referencing a header that is absent behaves like an
        // unmatched/malformed condition: skipped silently, falling through.
        let malformed = rule(
            RuleCondition::HeaderCondition { header: "x-nope".to_string(), op: HeaderOp::Equals, value: None },
            TriageAction::Skip,
            0,
        );
        let matched = evaluate_triage(&[malformed], &envelope_from("a@b.com"), None);
        assert_eq!(matched.action, TriageAction::PassThrough);
    }
}
