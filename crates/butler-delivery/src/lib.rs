mod backoff;
mod deliver;
mod dlq;
mod provider;

pub use backoff::{backoff_delay, DeliveryConfig};
pub use deliver::{deliver, DeliverError, DeliveryOutcomeSummary};
pub use dlq::{
    assess_eligibility, discard, inspect, list, replay, DlqError, InspectResult,
    ListDeadLettersArgs, ReplayEligibilityAssessment, ReplayResult,
};
pub use provider::{AttemptOutcome, ChannelProvider};
