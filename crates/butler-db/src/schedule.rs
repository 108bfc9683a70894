//! `scheduled_task` CRUD and the sync/tick primitives from §4.C.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ScheduledTaskRow {
    pub id: i64,
    pub name: String,
    pub cron_expr: String,
    pub prompt: Option<String>,
    pub job_name: Option<String>,
    pub job_args_json: Option<Value>,
    pub source: String,
    pub enabled: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_result_json: Option<Value>,
    pub timezone: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub until_at: Option<DateTime<Utc>>,
    pub calendar_event_id: Option<String>,
}

fn row_to_task(row: sqlx::postgres::PgRow) -> Result<ScheduledTaskRow> {
    Ok(ScheduledTaskRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        cron_expr: row.try_get("cron_expr")?,
        prompt: row.try_get("prompt")?,
        job_name: row.try_get("job_name")?,
        job_args_json: row.try_get("job_args_json")?,
        source: row.try_get("source")?,
        enabled: row.try_get("enabled")?,
        next_run_at: row.try_get("next_run_at")?,
        last_run_at: row.try_get("last_run_at")?,
        last_result_json: row.try_get("last_result_json")?,
        timezone: row.try_get("timezone")?,
        start_at: row.try_get("start_at")?,
        end_at: row.try_get("end_at")?,
        until_at: row.try_get("until_at")?,
        calendar_event_id: row.try_get("calendar_event_id")?,
    })
}

const COLUMNS: &str = "id, name, cron_expr, prompt, job_name, job_args_json, source, enabled, \
     next_run_at, last_run_at, last_result_json, timezone, start_at, end_at, until_at, calendar_event_id";

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("schedule name '{0}' already exists")]
    DuplicateName(String),
    #[error("scheduled task {0} not found")]
    NotFound(i64),
    #[error("scheduled task '{0}' is TOML-sourced and cannot be deleted")]
    TomlSourcedDeleteRefused(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub struct NewScheduledTask {
    pub name: String,
    pub cron_expr: String,
    pub prompt: Option<String>,
    pub job_name: Option<String>,
    pub job_args_json: Option<Value>,
    pub source: String,
    pub timezone: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub until_at: Option<DateTime<Utc>>,
    pub calendar_event_id: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
}

pub async fn create(pool: &PgPool, task: NewScheduledTask) -> Result<ScheduledTaskRow, ScheduleError> {
    let row = sqlx::query(&format!(
        r#"
        insert into scheduled_task (
            name, cron_expr, prompt, job_name, job_args_json, source, enabled,
            next_run_at, timezone, start_at, end_at, until_at, calendar_event_id
        ) values (
            $1, $2, $3, $4, $5, $6, true, $7, $8, $9, $10, $11, $12
        )
        returning {COLUMNS}
        "#
    ))
    .bind(&task.name)
    .bind(&task.cron_expr)
    .bind(&task.prompt)
    .bind(&task.job_name)
    .bind(&task.job_args_json)
    .bind(&task.source)
    .bind(task.next_run_at)
    .bind(&task.timezone)
    .bind(task.start_at)
    .bind(task.end_at)
    .bind(task.until_at)
    .bind(&task.calendar_event_id)
    .fetch_one(pool)
    .await;

    match row {
        Ok(row) => Ok(row_to_task(row)?),
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
            Err(ScheduleError::DuplicateName(task.name))
        }
        Err(e) => Err(ScheduleError::Other(anyhow::Error::new(e).context("scheduled_task insert failed"))),
    }
}

pub async fn fetch(pool: &PgPool, id: i64) -> Result<Option<ScheduledTaskRow>> {
    let row = sqlx::query(&format!("select {COLUMNS} from scheduled_task where id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("scheduled_task fetch failed")?;
    row.map(row_to_task).transpose()
}

pub async fn fetch_by_name(pool: &PgPool, name: &str) -> Result<Option<ScheduledTaskRow>> {
    let row = sqlx::query(&format!("select {COLUMNS} from scheduled_task where name = $1"))
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("scheduled_task fetch_by_name failed")?;
    row.map(row_to_task).transpose()
}

pub async fn list_all(pool: &PgPool) -> Result<Vec<ScheduledTaskRow>> {
    let rows = sqlx::query(&format!("select {COLUMNS} from scheduled_task order by name asc"))
        .fetch_all(pool)
        .await
        .context("scheduled_task list_all failed")?;
    rows.into_iter().map(row_to_task).collect()
}

/// Rows where `enabled=true and next_run_at <= now()` — the tick selection set.
pub async fn list_due(pool: &PgPool) -> Result<Vec<ScheduledTaskRow>> {
    let rows = sqlx::query(&format!(
        "select {COLUMNS} from scheduled_task where enabled = true and next_run_at <= now() order by id asc"
    ))
    .fetch_all(pool)
    .await
    .context("scheduled_task list_due failed")?;
    rows.into_iter().map(row_to_task).collect()
}

/// Overwrite cron/prompt/job fields and recompute `next_run_at` to the
/// caller-computed value (croniter equivalent lives in `butler-scheduler`;
/// this layer just persists whatever the caller already resolved).
pub async fn upsert_toml_sourced(
    pool: &PgPool,
    task: NewScheduledTask,
) -> Result<ScheduledTaskRow, ScheduleError> {
    let row = sqlx::query(&format!(
        r#"
        insert into scheduled_task (
            name, cron_expr, prompt, job_name, job_args_json, source, enabled,
            next_run_at, timezone, start_at, end_at, until_at, calendar_event_id
        ) values (
            $1, $2, $3, $4, $5, 'toml', true, $6, $7, $8, $9, $10, $11
        )
        on conflict (name) do update
            set cron_expr         = excluded.cron_expr,
                prompt            = excluded.prompt,
                job_name          = excluded.job_name,
                job_args_json     = excluded.job_args_json,
                source            = 'toml',
                enabled           = true,
                next_run_at       = excluded.next_run_at,
                timezone          = excluded.timezone,
                start_at          = excluded.start_at,
                end_at            = excluded.end_at,
                until_at          = excluded.until_at,
                calendar_event_id = excluded.calendar_event_id
        returning {COLUMNS}
        "#
    ))
    .bind(&task.name)
    .bind(&task.cron_expr)
    .bind(&task.prompt)
    .bind(&task.job_name)
    .bind(&task.job_args_json)
    .bind(task.next_run_at)
    .bind(&task.timezone)
    .bind(task.start_at)
    .bind(task.end_at)
    .bind(task.until_at)
    .bind(&task.calendar_event_id)
    .fetch_one(pool)
    .await
    .context("scheduled_task upsert_toml_sourced failed")?;

    Ok(row_to_task(row)?)
}

/// Disable every `source='toml'` row whose name is not in `declared_names`,
/// nulling `next_run_at` but never deleting — history is preserved.
pub async fn disable_undeclared_toml_tasks(pool: &PgPool, declared_names: &[String]) -> Result<u64> {
    let result = sqlx::query(
        r#"
        update scheduled_task
           set enabled     = false,
               next_run_at = null
         where source = 'toml'
           and enabled = true
           and not (name = any($1))
        "#,
    )
    .bind(declared_names)
    .execute(pool)
    .await
    .context("scheduled_task disable_undeclared_toml_tasks failed")?;
    Ok(result.rows_affected())
}

pub async fn set_enabled(pool: &PgPool, id: i64, enabled: bool, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
    sqlx::query(
        r#"
        update scheduled_task
           set enabled     = $2,
               next_run_at = $3
         where id = $1
        "#,
    )
    .bind(id)
    .bind(enabled)
    .bind(next_run_at)
    .execute(pool)
    .await
    .context("scheduled_task set_enabled failed")?;
    Ok(())
}

pub async fn record_tick_result(
    pool: &PgPool,
    id: i64,
    last_result_json: Value,
    next_run_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query(
        r#"
        update scheduled_task
           set last_run_at      = now(),
               last_result_json = $2,
               next_run_at      = $3
         where id = $1
        "#,
    )
    .bind(id)
    .bind(last_result_json)
    .bind(next_run_at)
    .execute(pool)
    .await
    .context("scheduled_task record_tick_result failed")?;
    Ok(())
}

/// TOML-sourced tasks refuse deletion; DB-sourced tasks delete outright.
pub async fn delete(pool: &PgPool, id: i64) -> Result<(), ScheduleError> {
    let task = fetch(pool, id).await?.ok_or(ScheduleError::NotFound(id))?;
    if task.source == "toml" {
        return Err(ScheduleError::TomlSourcedDeleteRefused(task.name));
    }
    sqlx::query("delete from scheduled_task where id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("scheduled_task delete failed")?;
    Ok(())
}
