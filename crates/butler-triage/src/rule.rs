use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainMatch {
    Exact,
    Suffix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderOp {
    Present,
    Equals,
    Contains,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule_type", rename_all = "snake_case")]
pub enum RuleCondition {
    SenderDomain {
        domain: String,
        #[serde(rename = "match")]
        match_kind: DomainMatch,
    },
    SenderAddress {
        address: String,
    },
    HeaderCondition {
        header: String,
        op: HeaderOp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    MimeType {
        pattern: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageAction {
    RouteTo,
    Skip,
    MetadataOnly,
    LowPriorityQueue,
    PassThrough,
}

impl TriageAction {
    /// Every action other than `pass_through` short-circuits the normal LLM
    /// invocation path (spec §4.G).
    pub fn bypasses_llm(self) -> bool {
        !matches!(self, TriageAction::PassThrough)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageRule {
    pub id: Uuid,
    pub butler_name: String,
    pub condition: RuleCondition,
    pub action: TriageAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_butler: Option<String>,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypasses_llm_is_false_only_for_pass_through() {
        assert!(!TriageAction::PassThrough.bypasses_llm());
        assert!(TriageAction::Skip.bypasses_llm());
        assert!(TriageAction::RouteTo.bypasses_llm());
        assert!(TriageAction::MetadataOnly.bypasses_llm());
        assert!(TriageAction::LowPriorityQueue.bypasses_llm());
    }
}
