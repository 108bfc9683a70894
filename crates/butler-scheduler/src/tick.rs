use std::future::Future;
use std::pin::Pin;

use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{error, info};

use crate::next_run::compute_next_run_at;
use butler_db::schedule::{self, ScheduledTaskRow};

pub type DispatchFuture = Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>;

/// What the tick loop hands to the caller-supplied dispatcher for each due
/// row — `job_name`/`job_args_json` take priority when both are present is
/// impossible by construction (`ScheduleDecl::validate` enforces exactly
/// one), so callers only need to branch on which field is `Some`.
pub struct DispatchRequest<'a> {
    pub prompt: Option<&'a str>,
    pub job_name: Option<&'a str>,
    pub job_args: Option<&'a Value>,
    pub trigger_source: &'static str,
}

/// Runs one tick: dispatches every due row, advances `next_run_at`, and
/// records `last_result`. Failures from `dispatch_fn` do not halt the loop
/// and do not count toward the returned success count (§4.C "Tick").
pub async fn tick<F>(pool: &PgPool, mut dispatch_fn: F) -> anyhow::Result<usize>
where
    F: FnMut(DispatchRequest<'_>) -> DispatchFuture,
{
    let due = schedule::list_due(pool).await?;
    let mut successes = 0usize;

    for row in due {
        let outcome = run_one(pool, &row, &mut dispatch_fn).await;
        if outcome {
            successes += 1;
        }
    }

    Ok(successes)
}

async fn run_one<F>(pool: &PgPool, row: &ScheduledTaskRow, dispatch_fn: &mut F) -> bool
where
    F: FnMut(DispatchRequest<'_>) -> DispatchFuture,
{
    let request = DispatchRequest {
        prompt: row.prompt.as_deref(),
        job_name: row.job_name.as_deref(),
        job_args: row.job_args_json.as_ref(),
        trigger_source: "schedule",
    };

    let result = dispatch_fn(request).await;

    let (last_result_json, succeeded) = match result {
        Ok(value) => (value, true),
        Err(message) => {
            error!(schedule = %row.name, error = %message, "scheduled dispatch failed");
            (serde_json::json!({"error": message}), false)
        }
    };

    let next_run_at = match compute_next_run_at(&row.cron_expr, row.timezone.as_deref(), Utc::now()) {
        Ok(next) => next,
        Err(e) => {
            error!(schedule = %row.name, error = %e, "failed to recompute next_run_at after tick");
            None
        }
    };

    if let Err(e) = schedule::record_tick_result(pool, row.id, last_result_json, next_run_at).await {
        error!(schedule = %row.name, error = %e, "failed to persist tick result");
        return false;
    }

    if succeeded {
        info!(schedule = %row.name, next_run_at = ?next_run_at, "scheduled dispatch succeeded");
    }
    succeeded
}
