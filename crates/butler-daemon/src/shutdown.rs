//! Graceful shutdown orchestrator (§4.L): exact five-step order, grounded
//! in the teacher's `main.rs` top-to-bottom construction run in reverse —
//! tracing/state/router/bind going up becomes module-shutdown/drain/db-close
//! coming down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use butler_buffer::DurableBuffer;
use butler_spawner::{SdkQuery, Spawner};
use sqlx::PgPool;

use crate::modules::{Module, ModuleStatus};

/// Synchronous flag any inbound path checks before accepting new work.
/// Lives on `AppState`; shared here by reference since shutdown never owns
/// the flag it flips.
pub struct AcceptingConnections(AtomicBool);

impl AcceptingConnections {
    pub fn new() -> Self {
        Self(AtomicBool::new(true))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for AcceptingConnections {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ShutdownPlan<'a, Q: SdkQuery> {
    pub accepting: &'a AcceptingConnections,
    pub spawner: Option<&'a Spawner<Q>>,
    /// Only present on the switchboard; stopped alongside the spawner since
    /// both represent in-flight work that must drain before module shutdown.
    pub ingest_buffer: Option<&'a Arc<DurableBuffer>>,
    pub modules: &'a [(Arc<dyn Module>, ModuleStatus)],
    pub pool: Option<&'a PgPool>,
    pub timeout: Duration,
}

/// Runs the five steps in strict order. Double-stop is a no-op because
/// step 1 and 2 are both idempotent flag flips, step 3 over an
/// already-empty spawner returns immediately, and a daemon with no modules
/// or no pool just skips those steps.
pub async fn run_shutdown<Q: SdkQuery + 'static>(plan: ShutdownPlan<'_, Q>) {
    plan.accepting.stop();

    if let Some(spawner) = plan.spawner {
        spawner.stop_accepting();
        spawner.drain(plan.timeout).await;
    }

    if let Some(buffer) = plan.ingest_buffer {
        buffer.stop(plan.timeout).await;
    }

    for (module, status) in plan.modules {
        if status.is_active() {
            module.on_shutdown().await;
        }
    }

    if let Some(pool) = plan.pool {
        pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::FailurePhase;
    use async_trait::async_trait;
    use butler_spawner::{SessionOptions, SessionOutcome};
    use std::sync::Mutex as StdMutex;
    use tokio_util::sync::CancellationToken;

    struct ImmediateQuery;

    #[async_trait]
    impl SdkQuery for ImmediateQuery {
        async fn query(&self, _prompt: &str, _options: &SessionOptions, _cancel: CancellationToken) -> SessionOutcome {
            SessionOutcome::ok(serde_json::json!({}))
        }
    }

    struct RecordingModule {
        name: String,
        log: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Module for RecordingModule {
        fn name(&self) -> &str {
            &self.name
        }

        fn dependencies(&self) -> &[String] {
            &[]
        }

        fn validate_config(&self, _raw: Option<&toml::Value>) -> Result<(), String> {
            Ok(())
        }

        async fn on_startup(&self) -> Result<(), String> {
            Ok(())
        }

        async fn on_shutdown(&self) {
            self.log.lock().unwrap().push(format!("module_shutdown:{}", self.name));
        }
    }

    #[tokio::test]
    async fn shutdown_without_a_spawner_succeeds() {
        let accepting = AcceptingConnections::new();
        let plan: ShutdownPlan<ImmediateQuery> = ShutdownPlan {
            accepting: &accepting,
            spawner: None,
            ingest_buffer: None,
            modules: &[],
            pool: None,
            timeout: Duration::from_secs(1),
        };
        run_shutdown(plan).await;
        assert!(!accepting.get());
    }

    #[tokio::test]
    async fn only_active_modules_are_shut_down() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let active = Arc::new(RecordingModule { name: "a".to_string(), log: log.clone() });
        let failed = Arc::new(RecordingModule { name: "b".to_string(), log: log.clone() });
        let modules: Vec<(Arc<dyn Module>, ModuleStatus)> = vec![
            (active, ModuleStatus::Active),
            (failed, ModuleStatus::Failed { phase: FailurePhase::Startup }),
        ];

        let accepting = AcceptingConnections::new();
        let plan: ShutdownPlan<ImmediateQuery> = ShutdownPlan {
            accepting: &accepting,
            spawner: None,
            ingest_buffer: None,
            modules: &modules,
            pool: None,
            timeout: Duration::from_secs(1),
        };
        run_shutdown(plan).await;

        assert_eq!(*log.lock().unwrap(), vec!["module_shutdown:a".to_string()]);
    }

    #[tokio::test]
    async fn stop_accepting_is_flipped_before_drain() {
        let query = Arc::new(ImmediateQuery);
        let spawner = Spawner::new(query, None);
        let accepting = AcceptingConnections::new();

        let plan = ShutdownPlan {
            accepting: &accepting,
            spawner: Some(&spawner),
            ingest_buffer: None,
            modules: &[],
            pool: None,
            timeout: Duration::from_secs(1),
        };
        run_shutdown(plan).await;

        assert!(!accepting.get());
        assert!(!spawner.is_accepting());
    }
}
