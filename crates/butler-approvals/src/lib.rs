mod executor;
mod queue;
mod sensitivity;
mod transition;

pub use executor::{execute_approved_action, ActionLocks, ActionTool, ExecutionResult, ExecutorError};
pub use queue::{
    approve_action, create_approval_rule, create_rule_from_action, expire_stale_actions,
    list_approval_rules, list_executed_actions, list_pending_actions, pending_action_count,
    reject_action, revoke_approval_rule, show_approval_rule, show_pending_action,
    suggest_rule_constraints, ApprovalsError, ApproveActionResult, PendingActionCount,
    RuleOverrides,
};
pub use sensitivity::{suggest_constraints_for_args, SuggestedConstraints};
pub use transition::{validate_transition, InvalidTransition};
