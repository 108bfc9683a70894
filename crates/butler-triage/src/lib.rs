mod engine;
mod envelope;
mod rule;

pub use engine::{evaluate_triage, TriageDecision};
pub use envelope::{make_triage_envelope_from_ingest, TriageEnvelope};
pub use rule::{DomainMatch, HeaderOp, RuleCondition, TriageAction, TriageRule};
