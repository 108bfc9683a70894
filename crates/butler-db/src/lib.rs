//! Per-butler Postgres schema access: pooled connection, JSONB normalization,
//! the compare-and-set KV primitive, and CRUD for every core-substrate table
//! from §3. Domain-specific business tables (health measurements, calendar
//! entries, …) live in their own module's crate, not here.

pub mod approvals;
pub mod delivery;
pub mod registry;
pub mod route_inbox;
pub mod schedule;
pub mod state;

pub use approvals::{ApprovalEventRow, ApprovalRuleRow, PendingActionRow, PendingActionStatus};
pub use delivery::{DeadLetterRow, DeliveryAttemptRow, DeliveryRequestRow};
pub use registry::ButlerRegistryRow;
pub use route_inbox::{RouteInboxLifecycle, RouteInboxRow};
pub use schedule::ScheduledTaskRow;
pub use state::{state_compare_and_set, state_get, state_set, CasError, KvState};

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub const ENV_DB_URL: &str = "BUTLER_DATABASE_URL";

/// Connect to Postgres using `BUTLER_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Test helper: connect using `BUTLER_DATABASE_URL` and apply pending migrations.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='route_inbox'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_core_tables: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_core_tables: bool,
}

/// Normalize a value read out of a `JSONB` column: sqlx already decodes
/// `JSONB` into `serde_json::Value` directly, but values that arrive as a
/// double-encoded JSON string (e.g. round-tripped through a text column, or
/// handed in from an untyped RPC boundary) need an extra parse pass before
/// callers can treat them uniformly as structured JSON.
pub fn normalize_jsonb(v: Value) -> Value {
    match v {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}
