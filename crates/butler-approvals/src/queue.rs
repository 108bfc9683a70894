use std::collections::BTreeMap;
use std::sync::Arc;

use butler_db::approvals::{self, ApprovalRuleRow, PendingActionRow, PendingActionStatus};
use butler_schemas::{ErrorKind, ToolError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use thiserror::Error;

use crate::executor::{execute_approved_action, ActionLocks, ActionTool, ExecutionResult, ExecutorError};
use crate::sensitivity::suggest_constraints_for_args;
use crate::transition::{validate_transition, InvalidTransition};

#[derive(Debug, Error)]
pub enum ApprovalsError {
    #[error("pending_action {0} not found")]
    ActionNotFound(i64),
    #[error("approval_rule {0} not found")]
    RuleNotFound(i64),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("pending_action {0} was changed concurrently by another caller")]
    ConcurrentTransition(i64),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("db error: {0}")]
    Db(#[from] anyhow::Error),
}

impl ApprovalsError {
    pub fn into_tool_error(self) -> ToolError {
        let message = self.to_string();
        let kind = match &self {
            ApprovalsError::ActionNotFound(_) | ApprovalsError::RuleNotFound(_) => ErrorKind::NotFound,
            ApprovalsError::InvalidTransition(_) | ApprovalsError::ConcurrentTransition(_) => ErrorKind::Conflict,
            ApprovalsError::Executor(ExecutorError::NotFound(_)) => ErrorKind::NotFound,
            ApprovalsError::Executor(ExecutorError::NotApproved(_)) => ErrorKind::Conflict,
            ApprovalsError::Executor(ExecutorError::Db(_)) => ErrorKind::InternalError,
            ApprovalsError::Db(_) => ErrorKind::InternalError,
        };
        ToolError::new(kind, message)
    }
}

pub async fn list_pending_actions(
    pool: &PgPool,
    status: Option<PendingActionStatus>,
    limit: Option<i64>,
) -> Result<Vec<PendingActionRow>, ApprovalsError> {
    Ok(approvals::list_actions(pool, status, limit.unwrap_or(50)).await?)
}

pub async fn show_pending_action(pool: &PgPool, id: i64) -> Result<PendingActionRow, ApprovalsError> {
    approvals::fetch_action(pool, id).await?.ok_or(ApprovalsError::ActionNotFound(id))
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingActionCount {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
}

pub async fn pending_action_count(pool: &PgPool) -> Result<PendingActionCount, ApprovalsError> {
    let rows = approvals::count_by_status(pool).await?;
    let by_status: BTreeMap<String, i64> = rows.into_iter().collect();
    let total = by_status.values().sum();
    Ok(PendingActionCount { total, by_status })
}

#[derive(Debug, Clone)]
pub struct ApproveActionResult {
    pub action: PendingActionRow,
    pub execution: Option<ExecutionResult>,
    pub created_rule: Option<ApprovalRuleRow>,
}

/// `approve_action` (§4.J): CAS `pending -> approved`; if a tool
/// implementation is wired, immediately runs the executor
/// (`approved -> executed`); optionally derives a standing rule from the
/// approved action via the sensitivity heuristic.
pub async fn approve_action(
    pool: &PgPool,
    locks: &ActionLocks,
    id: i64,
    decided_by: Option<&str>,
    create_rule: bool,
    tool_fn: Option<Arc<dyn ActionTool>>,
) -> Result<ApproveActionResult, ApprovalsError> {
    let current = show_pending_action(pool, id).await?;
    validate_transition(current.status, PendingActionStatus::Approved)?;

    let approved = approvals::transition_action(pool, id, PendingActionStatus::Pending, PendingActionStatus::Approved, decided_by)
        .await?
        .ok_or(ApprovalsError::ConcurrentTransition(id))?;

    let execution = if let Some(tool_fn) = tool_fn {
        Some(execute_approved_action(pool, locks, id, tool_fn, approved.approval_rule_id).await?)
    } else {
        None
    };

    let created_rule = if create_rule {
        Some(create_rule_from_action(pool, id, None).await?)
    } else {
        None
    };

    let final_row = approvals::fetch_action(pool, id).await?.ok_or(ApprovalsError::ActionNotFound(id))?;
    Ok(ApproveActionResult { action: final_row, execution, created_rule })
}

pub async fn reject_action(
    pool: &PgPool,
    id: i64,
    reason: Option<&str>,
) -> Result<PendingActionRow, ApprovalsError> {
    let current = show_pending_action(pool, id).await?;
    validate_transition(current.status, PendingActionStatus::Rejected)?;
    approvals::transition_action(pool, id, PendingActionStatus::Pending, PendingActionStatus::Rejected, reason)
        .await?
        .ok_or(ApprovalsError::ConcurrentTransition(id))
}

pub async fn expire_stale_actions(pool: &PgPool) -> Result<u64, ApprovalsError> {
    Ok(approvals::expire_stale_actions(pool).await?)
}

pub async fn create_approval_rule(
    pool: &PgPool,
    tool_name: &str,
    constraints: Value,
    description: &str,
    expires_at: Option<DateTime<Utc>>,
    max_uses: Option<i64>,
) -> Result<ApprovalRuleRow, ApprovalsError> {
    Ok(approvals::create_rule(pool, tool_name, constraints, description, expires_at, max_uses, None).await?)
}

#[derive(Debug, Clone, Default)]
pub struct RuleOverrides {
    pub constraints: Option<Value>,
    pub description: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_uses: Option<i64>,
}

pub async fn create_rule_from_action(
    pool: &PgPool,
    action_id: i64,
    overrides: Option<RuleOverrides>,
) -> Result<ApprovalRuleRow, ApprovalsError> {
    let action = show_pending_action(pool, action_id).await?;
    let overrides = overrides.unwrap_or_default();

    let constraints = overrides
        .constraints
        .unwrap_or_else(|| suggest_constraints_for_args(&action.tool_args_json).constraints);
    let description = overrides
        .description
        .unwrap_or_else(|| format!("auto-generated from action {action_id}"));

    Ok(approvals::create_rule(
        pool,
        &action.tool_name,
        constraints,
        &description,
        overrides.expires_at,
        overrides.max_uses,
        Some(action_id),
    )
    .await?)
}

pub async fn list_approval_rules(
    pool: &PgPool,
    tool_name: Option<&str>,
    active_only: bool,
) -> Result<Vec<ApprovalRuleRow>, ApprovalsError> {
    Ok(approvals::list_rules(pool, tool_name, active_only).await?)
}

pub async fn show_approval_rule(pool: &PgPool, id: i64) -> Result<ApprovalRuleRow, ApprovalsError> {
    approvals::fetch_rule(pool, id).await?.ok_or(ApprovalsError::RuleNotFound(id))
}

pub async fn revoke_approval_rule(pool: &PgPool, id: i64) -> Result<(), ApprovalsError> {
    if approvals::revoke_rule(pool, id).await? {
        Ok(())
    } else {
        Err(ApprovalsError::RuleNotFound(id))
    }
}

pub async fn suggest_rule_constraints(
    pool: &PgPool,
    action_id: i64,
) -> Result<crate::sensitivity::SuggestedConstraints, ApprovalsError> {
    let action = show_pending_action(pool, action_id).await?;
    Ok(suggest_constraints_for_args(&action.tool_args_json))
}

pub async fn list_executed_actions(
    pool: &PgPool,
    tool_name: Option<&str>,
    approval_rule_id: Option<i64>,
    since: Option<DateTime<Utc>>,
    limit: Option<i64>,
) -> Result<Vec<PendingActionRow>, ApprovalsError> {
    Ok(approvals::list_executed_actions(pool, tool_name, approval_rule_id, since, limit.unwrap_or(500)).await?)
}
