use anyhow::Result;
use butler_config::schedule::ScheduleDecl;
use butler_db::schedule::{self, NewScheduledTask, ScheduledTaskRow};
use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::next_run::compute_next_run_at;

/// Syncs declared `[[butler.schedule]]` entries into `scheduled_task`
/// (§4.C "Sync"). Declared entries are upserted with `source='toml'`;
/// previously-declared rows that disappeared from config are disabled, not
/// deleted, so their `last_result`/history survives a config edit.
pub async fn sync_toml_schedules(pool: &PgPool, declared: &[ScheduleDecl]) -> Result<()> {
    let now = Utc::now();
    let mut declared_names = Vec::with_capacity(declared.len());

    for decl in declared {
        decl.validate()
            .map_err(|e| anyhow::anyhow!("schedule '{}': {e}", decl.name))?;
        declared_names.push(decl.name.clone());

        let next_run_at = compute_next_run_at(&decl.cron, decl.timezone.as_deref(), now)
            .map_err(|e| anyhow::anyhow!("schedule '{}': {e}", decl.name))?;

        let row: ScheduledTaskRow = schedule::upsert_toml_sourced(
            pool,
            NewScheduledTask {
                name: decl.name.clone(),
                cron_expr: decl.cron.clone(),
                prompt: decl.prompt.clone(),
                job_name: decl.job_name.clone(),
                job_args_json: decl.job_args.clone(),
                source: "toml".to_string(),
                timezone: decl.timezone.clone(),
                start_at: decl.start_at,
                end_at: decl.end_at,
                until_at: decl.until_at,
                calendar_event_id: None,
                next_run_at,
            },
        )
        .await?;
        info!(schedule = %row.name, next_run_at = ?row.next_run_at, "schedule synced from config");
    }

    let disabled = schedule::disable_undeclared_toml_tasks(pool, &declared_names).await?;
    if disabled > 0 {
        warn!(count = disabled, "disabled scheduled_task rows no longer declared in config");
    }

    Ok(())
}
