use butler_db::approvals::PendingActionStatus as Status;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Cannot transition from {from} to {to}")]
pub struct InvalidTransition {
    from: &'static str,
    to: &'static str,
}

/// The only legal transitions for a pending action (§3, §4.J):
/// `pending -> approved | rejected | expired`, `approved -> executed`.
/// Everything else, including any transition out of a terminal state, is
/// rejected without mutating anything.
pub fn validate_transition(current: Status, target: Status) -> Result<(), InvalidTransition> {
    let allowed = matches!(
        (current, target),
        (Status::Pending, Status::Approved)
            | (Status::Pending, Status::Rejected)
            | (Status::Pending, Status::Expired)
            | (Status::Approved, Status::Executed)
    );
    if allowed {
        Ok(())
    } else {
        Err(InvalidTransition { from: current.as_str(), to: target.as_str() })
    }
}
