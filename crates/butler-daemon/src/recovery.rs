//! Startup recovery (§4.F `_recover_route_inbox`): every non-switchboard
//! butler re-enqueues rows stuck in `accepted` as process-phase tasks. The
//! switchboard skips this entirely — it recovers through its own durable
//! buffer scanner instead (`butler-buffer::scanner_sweep`).

use std::sync::Arc;

use butler_db::route_inbox;
use butler_schemas::RouteEnvelope;
use butler_spawner::{SdkQuery, Spawner};
use butler_telemetry::new_root_trace_context;
use sqlx::PgPool;

use crate::route_tool::spawn_recovered;

/// Re-enqueues every `accepted` row as a process-phase task. A crash-era
/// accept span no longer exists to continue, so each recovered row starts
/// a fresh trace rather than pretending to continue one that already ended.
pub async fn recover_route_inbox<Q: SdkQuery + 'static>(
    pool: &PgPool,
    spawner: &Arc<Spawner<Q>>,
    is_switchboard: bool,
) -> anyhow::Result<usize> {
    if is_switchboard {
        return Ok(0);
    }

    let rows = route_inbox::list_all_accepted(pool).await?;
    let mut recovered = 0;
    for row in rows {
        let envelope: RouteEnvelope = match serde_json::from_value(row.envelope_json) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(inbox_id = %row.id, error = %e, "skipping unrecoverable route_inbox row");
                continue;
            }
        };

        let request_id = envelope.request_context.request_id;
        let trace_ctx = envelope.trace_context.unwrap_or_else(new_root_trace_context);
        tokio::spawn(spawn_recovered(
            pool.clone(),
            spawner.clone(),
            row.id,
            envelope.input.prompt,
            request_id,
            trace_ctx,
        ));
        recovered += 1;
    }

    if recovered > 0 {
        tracing::info!(count = recovered, "recovered accepted route_inbox rows on startup");
    }
    Ok(recovered)
}
