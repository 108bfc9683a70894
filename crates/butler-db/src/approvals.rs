//! `pending_action` / `approval_rule` / `approval_events` CRUD (§3, §4.J).
//! The transition state machine itself (`validate_transition`) lives in
//! `butler-approvals`; this module only persists whatever transition the
//! caller has already validated, via CAS `where status = $expected`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingActionStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Executed,
}

impl PendingActionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Executed => "executed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            "executed" => Ok(Self::Executed),
            other => Err(anyhow::anyhow!("invalid pending_action status: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingActionRow {
    pub id: i64,
    pub tool_name: String,
    pub tool_args_json: Value,
    pub status: PendingActionStatus,
    pub approval_rule_id: Option<i64>,
    pub requested_at: DateTime<Utc>,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub execution_result_json: Option<Value>,
}

fn row_to_action(row: sqlx::postgres::PgRow) -> Result<PendingActionRow> {
    Ok(PendingActionRow {
        id: row.try_get("id")?,
        tool_name: row.try_get("tool_name")?,
        tool_args_json: crate::normalize_jsonb(row.try_get("tool_args_json")?),
        status: PendingActionStatus::parse(&row.try_get::<String, _>("status")?)?,
        approval_rule_id: row.try_get("approval_rule_id")?,
        requested_at: row.try_get("requested_at")?,
        decided_by: row.try_get("decided_by")?,
        decided_at: row.try_get("decided_at")?,
        expires_at: row.try_get("expires_at")?,
        execution_result_json: row.try_get("execution_result_json")?,
    })
}

const ACTION_COLUMNS: &str = "id, tool_name, tool_args_json, status, approval_rule_id, \
    requested_at, decided_by, decided_at, expires_at, execution_result_json";

pub async fn create_pending_action(
    pool: &PgPool,
    tool_name: &str,
    tool_args_json: Value,
    expires_at: Option<DateTime<Utc>>,
) -> Result<PendingActionRow> {
    let row = sqlx::query(&format!(
        r#"
        insert into pending_action (tool_name, tool_args_json, expires_at)
        values ($1, $2, $3)
        returning {ACTION_COLUMNS}
        "#
    ))
    .bind(tool_name)
    .bind(tool_args_json)
    .bind(expires_at)
    .fetch_one(pool)
    .await
    .context("pending_action insert failed")?;
    row_to_action(row)
}

pub async fn fetch_action(pool: &PgPool, id: i64) -> Result<Option<PendingActionRow>> {
    let row = sqlx::query(&format!("select {ACTION_COLUMNS} from pending_action where id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("pending_action fetch failed")?;
    row.map(row_to_action).transpose()
}

pub async fn list_actions(
    pool: &PgPool,
    status: Option<PendingActionStatus>,
    limit: i64,
) -> Result<Vec<PendingActionRow>> {
    let rows = if let Some(status) = status {
        sqlx::query(&format!(
            "select {ACTION_COLUMNS} from pending_action where status = $1 order by requested_at desc limit $2"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(pool)
        .await
    } else {
        sqlx::query(&format!(
            "select {ACTION_COLUMNS} from pending_action order by requested_at desc limit $1"
        ))
        .bind(limit)
        .fetch_all(pool)
        .await
    }
    .context("pending_action list failed")?;
    rows.into_iter().map(row_to_action).collect()
}

pub async fn count_by_status(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "select status, count(*)::bigint from pending_action group by status",
    )
    .fetch_all(pool)
    .await
    .context("pending_action count_by_status failed")?;
    Ok(rows)
}

/// CAS transition: succeeds only if the row's current status equals `from`.
/// Returns the updated row, or `None` if the CAS missed (row not found or
/// already in a different status — the caller's `validate_transition` should
/// have been checked before calling this, but the DB enforces it too).
pub async fn transition_action(
    pool: &PgPool,
    id: i64,
    from: PendingActionStatus,
    to: PendingActionStatus,
    decided_by: Option<&str>,
) -> Result<Option<PendingActionRow>> {
    let row = sqlx::query(&format!(
        r#"
        update pending_action
           set status     = $3,
               decided_by = coalesce($4, decided_by),
               decided_at = now()
         where id = $1
           and status = $2
        returning {ACTION_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(decided_by)
    .fetch_optional(pool)
    .await
    .context("pending_action transition failed")?;
    row.map(row_to_action).transpose()
}

/// `approved -> executed`, storing the execution result. Only succeeds if
/// the row is currently `approved` — the idempotent-replay case (already
/// `executed`) is handled by the caller re-reading instead of calling this.
pub async fn mark_executed(
    pool: &PgPool,
    id: i64,
    execution_result_json: Value,
) -> Result<Option<PendingActionRow>> {
    let row = sqlx::query(&format!(
        r#"
        update pending_action
           set status                = 'executed',
               execution_result_json = $2,
               decided_at             = coalesce(decided_at, now())
         where id = $1
           and status = 'approved'
        returning {ACTION_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(execution_result_json)
    .fetch_optional(pool)
    .await
    .context("pending_action mark_executed failed")?;
    row.map(row_to_action).transpose()
}

/// Batch CAS `pending -> expired` for rows past `expires_at`. Returns the
/// number of rows transitioned.
pub async fn expire_stale_actions(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        update pending_action
           set status     = 'expired',
               decided_at = now()
         where status = 'pending'
           and expires_at is not null
           and expires_at <= now()
        "#,
    )
    .execute(pool)
    .await
    .context("pending_action expire_stale_actions failed")?;
    Ok(result.rows_affected())
}

pub async fn list_executed_actions(
    pool: &PgPool,
    tool_name: Option<&str>,
    approval_rule_id: Option<i64>,
    since: Option<DateTime<Utc>>,
    limit: i64,
) -> Result<Vec<PendingActionRow>> {
    let limit = limit.min(500);
    let rows = sqlx::query(&format!(
        r#"
        select {ACTION_COLUMNS} from pending_action
        where status = 'executed'
          and ($1::text is null or tool_name = $1)
          and ($2::bigint is null or approval_rule_id = $2)
          and ($3::timestamptz is null or decided_at >= $3)
        order by decided_at desc
        limit $4
        "#
    ))
    .bind(tool_name)
    .bind(approval_rule_id)
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("pending_action list_executed_actions failed")?;
    rows.into_iter().map(row_to_action).collect()
}

// ---------------------------------------------------------------------------
// approval_rule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ApprovalRuleRow {
    pub id: i64,
    pub tool_name: String,
    pub arg_constraints_json: Value,
    pub description: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_uses: Option<i64>,
    pub use_count: i64,
    pub created_from_action_id: Option<i64>,
}

fn row_to_rule(row: sqlx::postgres::PgRow) -> Result<ApprovalRuleRow> {
    Ok(ApprovalRuleRow {
        id: row.try_get("id")?,
        tool_name: row.try_get("tool_name")?,
        arg_constraints_json: crate::normalize_jsonb(row.try_get("arg_constraints_json")?),
        description: row.try_get("description")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        max_uses: row.try_get("max_uses")?,
        use_count: row.try_get("use_count")?,
        created_from_action_id: row.try_get("created_from_action_id")?,
    })
}

const RULE_COLUMNS: &str = "id, tool_name, arg_constraints_json, description, active, created_at, \
    expires_at, max_uses, use_count, created_from_action_id";

pub async fn create_rule(
    pool: &PgPool,
    tool_name: &str,
    arg_constraints_json: Value,
    description: &str,
    expires_at: Option<DateTime<Utc>>,
    max_uses: Option<i64>,
    created_from_action_id: Option<i64>,
) -> Result<ApprovalRuleRow> {
    let row = sqlx::query(&format!(
        r#"
        insert into approval_rule (
            tool_name, arg_constraints_json, description, expires_at, max_uses, created_from_action_id
        ) values ($1, $2, $3, $4, $5, $6)
        returning {RULE_COLUMNS}
        "#
    ))
    .bind(tool_name)
    .bind(arg_constraints_json)
    .bind(description)
    .bind(expires_at)
    .bind(max_uses)
    .bind(created_from_action_id)
    .fetch_one(pool)
    .await
    .context("approval_rule insert failed")?;
    row_to_rule(row)
}

pub async fn fetch_rule(pool: &PgPool, id: i64) -> Result<Option<ApprovalRuleRow>> {
    let row = sqlx::query(&format!("select {RULE_COLUMNS} from approval_rule where id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("approval_rule fetch failed")?;
    row.map(row_to_rule).transpose()
}

pub async fn list_rules(
    pool: &PgPool,
    tool_name: Option<&str>,
    active_only: bool,
) -> Result<Vec<ApprovalRuleRow>> {
    let rows = sqlx::query(&format!(
        r#"
        select {RULE_COLUMNS} from approval_rule
        where ($1::text is null or tool_name = $1)
          and (not $2 or active = true)
        order by created_at desc
        "#
    ))
    .bind(tool_name)
    .bind(active_only)
    .fetch_all(pool)
    .await
    .context("approval_rule list failed")?;
    rows.into_iter().map(row_to_rule).collect()
}

pub async fn revoke_rule(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query("update approval_rule set active = false where id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("approval_rule revoke failed")?;
    Ok(result.rows_affected() > 0)
}

/// Atomically increment `use_count`. The caller is responsible for having
/// already confirmed `use_count < max_uses` (or `max_uses` unset) before the
/// matching action executed.
pub async fn increment_rule_use_count(pool: &PgPool, id: i64) -> Result<()> {
    sqlx::query("update approval_rule set use_count = use_count + 1 where id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("approval_rule increment_use_count failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// approval_events (audit trail, hash-chained)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ApprovalEventRow {
    pub id: i64,
    pub action_id: i64,
    pub event_type: String,
    pub actor: String,
    pub detail_json: Value,
    pub event_id: Uuid,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn row_to_event(row: sqlx::postgres::PgRow) -> Result<ApprovalEventRow> {
    Ok(ApprovalEventRow {
        id: row.try_get("id")?,
        action_id: row.try_get("action_id")?,
        event_type: row.try_get("event_type")?,
        actor: row.try_get("actor")?,
        detail_json: row.try_get("detail_json")?,
        event_id: row.try_get("event_id")?,
        hash_prev: row.try_get("hash_prev")?,
        hash_self: row.try_get("hash_self")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Class id for the two-key advisory lock below. Arbitrary; only needs to
/// be distinct from other advisory-lock users of this database. Each
/// `pending_action` gets its own chain, keyed on `(AUDIT_CHAIN_LOCK_CLASS,
/// action_id)`, so unrelated actions' audit writers never serialize against
/// each other.
const AUDIT_CHAIN_LOCK_CLASS: i32 = 0x6175_6463;

async fn fetch_latest_audit_hash(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    action_id: i64,
) -> Result<Option<String>> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("select hash_self from approval_events where action_id = $1 order by id desc limit 1")
            .bind(action_id)
            .fetch_optional(&mut **tx)
            .await
            .context("fetch_latest_audit_hash failed")?;
    Ok(row.and_then(|(h,)| h))
}

/// Appends one audit event inside a transaction serialized (per `action_id`)
/// by an advisory lock, so `compute` always sees the true latest
/// `hash_self` for that action's chain regardless of which process is
/// appending concurrently. `compute` receives the previous hash and returns
/// `(event_id, hash_prev, hash_self)` for the new row; it does no I/O of its
/// own.
pub async fn append_audit_event<F>(
    pool: &PgPool,
    action_id: i64,
    event_type: &str,
    actor: &str,
    detail_json: Value,
    compute: F,
) -> Result<ApprovalEventRow>
where
    F: FnOnce(Option<&str>) -> Result<(Uuid, Option<String>, Option<String>)>,
{
    let mut tx = pool.begin().await.context("begin audit chain tx failed")?;
    sqlx::query("select pg_advisory_xact_lock($1, $2)")
        .bind(AUDIT_CHAIN_LOCK_CLASS)
        .bind(action_id as i32)
        .execute(&mut *tx)
        .await
        .context("audit chain advisory lock failed")?;

    let prev_hash = fetch_latest_audit_hash(&mut tx, action_id).await?;
    let (event_id, hash_prev, hash_self) = compute(prev_hash.as_deref())?;

    let row = sqlx::query(
        r#"
        insert into approval_events (action_id, event_type, actor, detail_json, event_id, hash_prev, hash_self)
        values ($1, $2, $3, $4, $5, $6, $7)
        returning id, action_id, event_type, actor, detail_json, event_id, hash_prev, hash_self, created_at
        "#,
    )
    .bind(action_id)
    .bind(event_type)
    .bind(actor)
    .bind(detail_json)
    .bind(event_id)
    .bind(&hash_prev)
    .bind(&hash_self)
    .fetch_one(&mut *tx)
    .await
    .context("approval_events insert failed")?;

    let event = row_to_event(row)?;
    tx.commit().await.context("commit audit chain tx failed")?;
    Ok(event)
}

pub async fn list_audit_events(
    pool: &PgPool,
    action_id: Option<i64>,
    since: Option<DateTime<Utc>>,
    limit: i64,
) -> Result<Vec<ApprovalEventRow>> {
    let rows = sqlx::query(
        r#"
        select id, action_id, event_type, actor, detail_json, event_id, hash_prev, hash_self, created_at
        from approval_events
        where ($1::bigint is null or action_id = $1)
          and ($2::timestamptz is null or created_at >= $2)
        order by id asc
        limit $3
        "#,
    )
    .bind(action_id)
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("list_audit_events failed")?;

    rows.into_iter().map(row_to_event).collect()
}
