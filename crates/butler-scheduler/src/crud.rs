use butler_db::schedule::{self, NewScheduledTask, ScheduleError, ScheduledTaskRow};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

use crate::next_run::{compute_next_run_at, validate_cron_expr, CronExprError};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Cron(#[from] CronExprError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

pub struct CreateScheduleArgs {
    pub name: String,
    pub cron_expr: String,
    pub prompt: Option<String>,
    pub job_name: Option<String>,
    pub job_args_json: Option<Value>,
    pub timezone: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub until_at: Option<DateTime<Utc>>,
}

/// `schedule_create` (§4.C): validates the cron expression before it ever
/// reaches the database; duplicate names surface as `ScheduleError::DuplicateName`
/// courtesy of the UNIQUE constraint on `scheduled_task.name`.
pub async fn schedule_create(
    pool: &PgPool,
    args: CreateScheduleArgs,
) -> Result<ScheduledTaskRow, SchedulerError> {
    validate_cron_expr(&args.cron_expr)?;
    let next_run_at = compute_next_run_at(&args.cron_expr, args.timezone.as_deref(), Utc::now())?;

    let row = schedule::create(
        pool,
        NewScheduledTask {
            name: args.name,
            cron_expr: args.cron_expr,
            prompt: args.prompt,
            job_name: args.job_name,
            job_args_json: args.job_args_json,
            source: "db".to_string(),
            timezone: args.timezone,
            start_at: args.start_at,
            end_at: args.end_at,
            until_at: args.until_at,
            calendar_event_id: None,
            next_run_at,
        },
    )
    .await?;
    Ok(row)
}

/// `schedule_update`'s `enabled` toggle (§4.C): enabling recomputes
/// `next_run_at`; disabling nulls it.
pub async fn schedule_set_enabled(pool: &PgPool, id: i64, enabled: bool) -> Result<(), SchedulerError> {
    let next_run_at = if enabled {
        let row = schedule::fetch(pool, id)
            .await
            .map_err(ScheduleError::Other)?
            .ok_or(ScheduleError::NotFound(id))?;
        compute_next_run_at(&row.cron_expr, row.timezone.as_deref(), Utc::now())?
    } else {
        None
    };
    schedule::set_enabled(pool, id, enabled, next_run_at)
        .await
        .map_err(ScheduleError::Other)?;
    Ok(())
}

/// `schedule_update`'s cron-change path: recomputes `next_run_at` for the
/// new expression and persists it alongside the new expression via a fresh
/// `record_tick_result`-style write would lose other fields, so this goes
/// through `set_enabled`'s sibling shape directly against the row.
pub async fn schedule_update_cron(pool: &PgPool, id: i64, new_cron_expr: &str) -> Result<(), SchedulerError> {
    validate_cron_expr(new_cron_expr)?;
    let row = schedule::fetch(pool, id)
        .await
        .map_err(ScheduleError::Other)?
        .ok_or(ScheduleError::NotFound(id))?;
    let next_run_at = compute_next_run_at(new_cron_expr, row.timezone.as_deref(), Utc::now())?;

    sqlx::query("update scheduled_task set cron_expr = $2, next_run_at = $3 where id = $1")
        .bind(id)
        .bind(new_cron_expr)
        .bind(next_run_at)
        .execute(pool)
        .await
        .map_err(|e| ScheduleError::Other(anyhow::Error::new(e)))?;
    Ok(())
}

/// `schedule_delete` (§4.C): refuses TOML-sourced rows.
pub async fn schedule_delete(pool: &PgPool, id: i64) -> Result<(), SchedulerError> {
    schedule::delete(pool, id).await?;
    Ok(())
}
