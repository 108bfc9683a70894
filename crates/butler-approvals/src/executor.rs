use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use butler_db::approvals::{self, PendingActionStatus};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

#[async_trait]
pub trait ActionTool: Send + Sync {
    async fn call(&self, tool_args: Value) -> Result<Value, String>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("pending action {0} not found")]
    NotFound(i64),
    #[error("action {0} is not approved")]
    NotApproved(i64),
    #[error("db error: {0}")]
    Db(#[from] anyhow::Error),
}

/// Per-action locks so two concurrent executions of the same `action_id`
/// (e.g. a retried RPC call) serialize instead of racing the tool call
/// itself. The CAS on `pending_action.status` is the cross-process
/// backstop; this lock only needs to cover same-process concurrency.
#[derive(Default)]
pub struct ActionLocks {
    locks: std::sync::Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl ActionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, action_id: i64) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(action_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

fn parse_stored_result(row: &butler_db::approvals::PendingActionRow) -> Option<ExecutionResult> {
    let raw = row.execution_result_json.as_ref()?;
    serde_json::from_value(raw.clone()).ok()
}

/// Runs an already-approved action's tool exactly once, even under
/// concurrent retries, then records the audit trail (§4.J).
pub async fn execute_approved_action(
    pool: &PgPool,
    locks: &ActionLocks,
    action_id: i64,
    tool_fn: Arc<dyn ActionTool>,
    approval_rule_id: Option<i64>,
) -> Result<ExecutionResult, ExecutorError> {
    let row = approvals::fetch_action(pool, action_id)
        .await?
        .ok_or(ExecutorError::NotFound(action_id))?;

    if row.status == PendingActionStatus::Executed {
        if let Some(result) = parse_stored_result(&row) {
            return Ok(result);
        }
    }

    let lock = locks.lock_for(action_id);
    let _guard = lock.lock().await;

    // Re-read after acquiring the lock: another same-process caller may
    // have just finished the execution we were waiting behind.
    let row = approvals::fetch_action(pool, action_id)
        .await?
        .ok_or(ExecutorError::NotFound(action_id))?;
    if row.status == PendingActionStatus::Executed {
        if let Some(result) = parse_stored_result(&row) {
            return Ok(result);
        }
    }
    if row.status != PendingActionStatus::Approved {
        return Err(ExecutorError::NotApproved(action_id));
    }

    let outcome = AssertUnwindSafe(tool_fn.call(row.tool_args_json.clone()))
        .catch_unwind()
        .await;

    let result = match outcome {
        Ok(Ok(value)) => ExecutionResult { success: true, result: Some(value), error: None, executed_at: Utc::now() },
        Ok(Err(message)) => ExecutionResult { success: false, result: None, error: Some(message), executed_at: Utc::now() },
        Err(_) => ExecutionResult {
            success: false,
            result: None,
            error: Some("tool panicked during execution".to_string()),
            executed_at: Utc::now(),
        },
    };

    let result_json = serde_json::to_value(&result).expect("ExecutionResult always serializes");
    let final_result = match approvals::mark_executed(pool, action_id, result_json).await? {
        Some(_) => result,
        None => {
            // CAS lost to a concurrent worker in another process; trust its result.
            let row = approvals::fetch_action(pool, action_id)
                .await?
                .ok_or(ExecutorError::NotFound(action_id))?;
            parse_stored_result(&row).unwrap_or(result)
        }
    };

    if let Some(rule_id) = approval_rule_id {
        approvals::increment_rule_use_count(pool, rule_id).await?;
    }

    let event_type = if final_result.success { "action_execution_succeeded" } else { "action_execution_failed" };
    let audit = butler_audit::AuditWriter::new(pool.clone(), true);
    audit
        .append(
            action_id,
            event_type,
            "system:executor",
            serde_json::to_value(&final_result).expect("ExecutionResult always serializes"),
        )
        .await
        .context("record audit event failed")?;

    Ok(final_result)
}
