use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::session::{SdkQuery, SessionOptions, SessionOutcome};

struct InFlight {
    cancel: CancellationToken,
}

/// Owns the concurrent LLM session lifetimes for one butler (§4.D).
///
/// `accepting_new` gates new `trigger` calls; `in_flight` tracks currently
/// running sessions by a generated session id so `drain` can cancel
/// stragglers individually.
pub struct Spawner<Q: SdkQuery> {
    query: Arc<Q>,
    pool: Option<PgPool>,
    accepting_new: AtomicBool,
    in_flight: Mutex<HashMap<Uuid, InFlight>>,
    drained: Notify,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TriggerResult {
    pub session_id: Uuid,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl<Q: SdkQuery + 'static> Spawner<Q> {
    pub fn new(query: Arc<Q>, pool: Option<PgPool>) -> Self {
        Self {
            query,
            pool,
            accepting_new: AtomicBool::new(true),
            in_flight: Mutex::new(HashMap::new()),
            drained: Notify::new(),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.try_lock().map(|g| g.len()).unwrap_or(0)
    }

    /// `trigger(prompt, trigger_source, request_id?)` (§4.D).
    pub async fn trigger(&self, prompt: String, options: SessionOptions) -> TriggerResult {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return TriggerResult {
                session_id: Uuid::new_v4(),
                success: false,
                output: None,
                error: Some("not accepting new triggers".to_string()),
                duration_ms: 0,
            };
        }

        let session_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        {
            let mut guard = self.in_flight.lock().await;
            guard.insert(session_id, InFlight { cancel: cancel.clone() });
        }

        let started = Instant::now();
        let outcome = self.query.query(&prompt, &options, cancel).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        {
            let mut guard = self.in_flight.lock().await;
            guard.remove(&session_id);
            if guard.is_empty() {
                self.drained.notify_waiters();
            }
        }

        if let Some(pool) = &self.pool {
            if let Err(e) = persist_session(pool, session_id, &options, &outcome).await {
                warn!(session_id = %session_id, error = %e, "failed to persist session metadata");
            }
        }

        info!(
            session_id = %session_id,
            success = outcome.success,
            duration_ms,
            trigger_source = %options.trigger_source,
            "session completed"
        );

        TriggerResult {
            session_id,
            success: outcome.success,
            output: outcome.output,
            error: outcome.error,
            duration_ms,
        }
    }

    /// Synchronous, idempotent: any subsequent `trigger` fails immediately.
    pub fn stop_accepting(&self) {
        self.accepting_new.store(false, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }

    /// Awaits `in_flight == 0` or `timeout`. On timeout, cancels all
    /// remaining sessions and waits for their cleanup. Guarantees
    /// `in_flight == 0` on return.
    pub async fn drain(&self, timeout: Duration) {
        let wait = async {
            loop {
                if self.in_flight.lock().await.is_empty() {
                    return;
                }
                self.drained.notified().await;
            }
        };

        if tokio::time::timeout(timeout, wait).await.is_err() {
            let tokens: Vec<CancellationToken> = {
                let guard = self.in_flight.lock().await;
                guard.values().map(|s| s.cancel.clone()).collect()
            };
            warn!(count = tokens.len(), "drain timeout: cancelling in-flight sessions");
            for token in tokens {
                token.cancel();
            }
            loop {
                if self.in_flight.lock().await.is_empty() {
                    break;
                }
                self.drained.notified().await;
            }
        }
    }
}

async fn persist_session(
    pool: &PgPool,
    session_id: Uuid,
    options: &SessionOptions,
    outcome: &SessionOutcome,
) -> anyhow::Result<()> {
    let key = format!("session:{session_id}");
    let value = serde_json::json!({
        "session_id": session_id,
        "trigger_source": options.trigger_source,
        "request_id": options.request_id,
        "success": outcome.success,
        "output": outcome.output,
        "error": outcome.error,
    });
    butler_db::state_set(pool, &key, value).await?;
    Ok(())
}
