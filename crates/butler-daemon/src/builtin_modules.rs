//! Concrete [`Module`] adapters for the two library crates the daemon
//! always needs regardless of which domain modules a given `butler.toml`
//! declares: the cron scheduler and (messenger-only) the rate limiter.
//! Domain modules (triage, approvals, …) follow the same adapter shape —
//! validate their own `[modules.<name>]` table, construct themselves on
//! `on_startup`, store the result behind a `OnceLock` for the binary to
//! pull out afterward — but wiring each one in is that module's own
//! concern, not the daemon's.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use butler_config::{validate_module_config, ScheduleDecl};
use butler_ratelimit::{RateLimiter, RateLimiterConfig};
use sqlx::PgPool;

use crate::modules::Module;

/// Syncs `[[butler.schedule]]` declarations into `scheduled_task` on every
/// startup (§4.C "Sync"). Config lives in `[butler]` itself, already parsed
/// by `butler-config`, so `validate_config` here is a no-op.
pub struct SchedulerModule {
    pool: PgPool,
    declared: Vec<ScheduleDecl>,
}

impl SchedulerModule {
    pub fn new(pool: PgPool, declared: Vec<ScheduleDecl>) -> Self {
        Self { pool, declared }
    }
}

#[async_trait]
impl Module for SchedulerModule {
    fn name(&self) -> &str {
        "scheduler"
    }

    fn dependencies(&self) -> &[String] {
        &[]
    }

    fn validate_config(&self, _raw: Option<&toml::Value>) -> Result<(), String> {
        Ok(())
    }

    async fn on_startup(&self) -> Result<(), String> {
        butler_scheduler::sync_toml_schedules(&self.pool, &self.declared)
            .await
            .map_err(|e| e.to_string())
    }

    async fn on_shutdown(&self) {}
}

/// Builds the messenger's shared [`RateLimiter`] from `[modules.ratelimit]`.
/// `on_startup` constructs the limiter once validation passes; the binary
/// reads it back out with [`RateLimiterModule::limiter`] after the lifecycle
/// pass completes.
pub struct RateLimiterModule {
    config: OnceLock<RateLimiterConfig>,
    limiter: OnceLock<Arc<RateLimiter>>,
}

impl RateLimiterModule {
    pub fn new() -> Self {
        Self { config: OnceLock::new(), limiter: OnceLock::new() }
    }

    pub fn limiter(&self) -> Option<Arc<RateLimiter>> {
        self.limiter.get().cloned()
    }
}

impl Default for RateLimiterModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for RateLimiterModule {
    fn name(&self) -> &str {
        "ratelimit"
    }

    fn dependencies(&self) -> &[String] {
        &[]
    }

    fn validate_config(&self, raw: Option<&toml::Value>) -> Result<(), String> {
        let raw = raw.ok_or_else(|| "missing [modules.ratelimit] table".to_string())?;
        let parsed: RateLimiterConfig = validate_module_config("ratelimit", raw).map_err(|e| e.to_string())?;
        let _ = self.config.set(parsed);
        Ok(())
    }

    async fn on_startup(&self) -> Result<(), String> {
        let config = self.config.get().ok_or_else(|| "ratelimit config never validated".to_string())?;
        let _ = self.limiter.set(Arc::new(RateLimiter::new(config.clone())));
        Ok(())
    }

    async fn on_shutdown(&self) {}
}
