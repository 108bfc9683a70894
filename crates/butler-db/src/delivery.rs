//! `delivery_request` / `delivery_attempt` / `dead_letter` (§3, §4.I).
//! The idempotent-enqueue and ledger shape is grounded on the teacher's
//! `oms_outbox`/`oms_inbox` pair: `ON CONFLICT DO NOTHING ... RETURNING` for
//! dedup, an append-only attempts table keyed by `(request_id, attempt_number)`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    InProgress,
    Delivered,
    Failed,
    DeadLettered,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::DeadLettered => "dead_lettered",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "dead_lettered" => Ok(Self::DeadLettered),
            other => Err(anyhow::anyhow!("invalid delivery_request status: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryRequestRow {
    pub id: Uuid,
    pub idempotency_key: String,
    pub origin_butler: String,
    pub channel: String,
    pub intent: String,
    pub target_identity: String,
    pub message_content: String,
    pub status: DeliveryStatus,
    pub terminal_error_class: Option<String>,
    pub terminal_error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub terminal_at: Option<DateTime<Utc>>,
}

fn row_to_request(row: sqlx::postgres::PgRow) -> Result<DeliveryRequestRow> {
    Ok(DeliveryRequestRow {
        id: row.try_get("id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        origin_butler: row.try_get("origin_butler")?,
        channel: row.try_get("channel")?,
        intent: row.try_get("intent")?,
        target_identity: row.try_get("target_identity")?,
        message_content: row.try_get("message_content")?,
        status: DeliveryStatus::parse(&row.try_get::<String, _>("status")?)?,
        terminal_error_class: row.try_get("terminal_error_class")?,
        terminal_error_message: row.try_get("terminal_error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        terminal_at: row.try_get("terminal_at")?,
    })
}

const REQUEST_COLUMNS: &str = "id, idempotency_key, origin_butler, channel, intent, target_identity, \
    message_content, status, terminal_error_class, terminal_error_message, created_at, updated_at, terminal_at";

pub struct NewDeliveryRequest {
    pub idempotency_key: String,
    pub origin_butler: String,
    pub channel: String,
    pub intent: String,
    pub target_identity: String,
    pub message_content: String,
}

/// Idempotent enqueue: repeated enqueue with the same key is a no-op that
/// returns the prior row instead of inserting a second one.
pub async fn enqueue(pool: &PgPool, req: NewDeliveryRequest) -> Result<(DeliveryRequestRow, bool)> {
    let inserted = sqlx::query(&format!(
        r#"
        insert into delivery_request (
            idempotency_key, origin_butler, channel, intent, target_identity, message_content
        ) values ($1, $2, $3, $4, $5, $6)
        on conflict (idempotency_key) do nothing
        returning {REQUEST_COLUMNS}
        "#
    ))
    .bind(&req.idempotency_key)
    .bind(&req.origin_butler)
    .bind(&req.channel)
    .bind(&req.intent)
    .bind(&req.target_identity)
    .bind(&req.message_content)
    .fetch_optional(pool)
    .await
    .context("delivery_request enqueue failed")?;

    if let Some(row) = inserted {
        return Ok((row_to_request(row)?, true));
    }

    let existing = fetch_by_idempotency_key(pool, &req.idempotency_key)
        .await?
        .context("delivery_request idempotency conflict but row missing on reread")?;
    Ok((existing, false))
}

pub async fn fetch(pool: &PgPool, id: Uuid) -> Result<Option<DeliveryRequestRow>> {
    let row = sqlx::query(&format!("select {REQUEST_COLUMNS} from delivery_request where id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("delivery_request fetch failed")?;
    row.map(row_to_request).transpose()
}

pub async fn fetch_by_idempotency_key(
    pool: &PgPool,
    idempotency_key: &str,
) -> Result<Option<DeliveryRequestRow>> {
    let row = sqlx::query(&format!(
        "select {REQUEST_COLUMNS} from delivery_request where idempotency_key = $1"
    ))
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await
    .context("delivery_request fetch_by_idempotency_key failed")?;
    row.map(row_to_request).transpose()
}

pub async fn set_status(pool: &PgPool, id: Uuid, status: DeliveryStatus) -> Result<()> {
    let terminal = matches!(
        status,
        DeliveryStatus::Delivered | DeliveryStatus::Failed | DeliveryStatus::DeadLettered
    );
    sqlx::query(
        r#"
        update delivery_request
           set status      = $2,
               updated_at  = now(),
               terminal_at = case when $3 then now() else terminal_at end
         where id = $1
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(terminal)
    .execute(pool)
    .await
    .context("delivery_request set_status failed")?;
    Ok(())
}

pub async fn set_terminal_error(
    pool: &PgPool,
    id: Uuid,
    status: DeliveryStatus,
    error_class: &str,
    error_message: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        update delivery_request
           set status                 = $2,
               terminal_error_class   = $3,
               terminal_error_message = $4,
               updated_at             = now(),
               terminal_at            = now()
         where id = $1
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(error_class)
    .bind(error_message)
    .execute(pool)
    .await
    .context("delivery_request set_terminal_error failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// delivery_attempt
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeliveryAttemptRow {
    pub id: i64,
    pub delivery_request_id: Uuid,
    pub attempt_number: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<i64>,
    pub outcome: String,
    pub error_class: Option<String>,
    pub error_message: Option<String>,
    pub provider_response_json: Option<Value>,
}

fn row_to_attempt(row: sqlx::postgres::PgRow) -> Result<DeliveryAttemptRow> {
    Ok(DeliveryAttemptRow {
        id: row.try_get("id")?,
        delivery_request_id: row.try_get("delivery_request_id")?,
        attempt_number: row.try_get("attempt_number")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        latency_ms: row.try_get("latency_ms")?,
        outcome: row.try_get("outcome")?,
        error_class: row.try_get("error_class")?,
        error_message: row.try_get("error_message")?,
        provider_response_json: row.try_get("provider_response_json")?,
    })
}

const ATTEMPT_COLUMNS: &str = "id, delivery_request_id, attempt_number, started_at, completed_at, \
    latency_ms, outcome, error_class, error_message, provider_response_json";

/// Begin a new attempt (`in_progress`), the next `attempt_number` for this
/// request.
pub async fn start_attempt(pool: &PgPool, delivery_request_id: Uuid) -> Result<DeliveryAttemptRow> {
    let row = sqlx::query(&format!(
        r#"
        insert into delivery_attempt (delivery_request_id, attempt_number, outcome)
        select $1,
               coalesce(max(attempt_number), 0) + 1,
               'in_progress'
        from delivery_attempt
        where delivery_request_id = $1
        returning {ATTEMPT_COLUMNS}
        "#
    ))
    .bind(delivery_request_id)
    .fetch_one(pool)
    .await
    .context("delivery_attempt start failed")?;
    row_to_attempt(row)
}

pub async fn complete_attempt(
    pool: &PgPool,
    id: i64,
    outcome: &str,
    latency_ms: i64,
    error_class: Option<&str>,
    error_message: Option<&str>,
    provider_response_json: Option<Value>,
) -> Result<()> {
    sqlx::query(
        r#"
        update delivery_attempt
           set completed_at           = now(),
               latency_ms             = $2,
               outcome                = $3,
               error_class            = $4,
               error_message          = $5,
               provider_response_json = $6
         where id = $1
        "#,
    )
    .bind(id)
    .bind(latency_ms)
    .bind(outcome)
    .bind(error_class)
    .bind(error_message)
    .bind(provider_response_json)
    .execute(pool)
    .await
    .context("delivery_attempt complete failed")?;
    Ok(())
}

pub async fn list_attempts(pool: &PgPool, delivery_request_id: Uuid) -> Result<Vec<DeliveryAttemptRow>> {
    let rows = sqlx::query(&format!(
        "select {ATTEMPT_COLUMNS} from delivery_attempt where delivery_request_id = $1 order by attempt_number asc"
    ))
    .bind(delivery_request_id)
    .fetch_all(pool)
    .await
    .context("delivery_attempt list failed")?;
    rows.into_iter().map(row_to_attempt).collect()
}

// ---------------------------------------------------------------------------
// dead_letter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeadLetterRow {
    pub id: i64,
    pub delivery_request_id: Uuid,
    pub quarantine_reason: String,
    pub error_class: String,
    pub error_summary: String,
    pub total_attempts: i32,
    pub first_attempt_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    pub original_envelope_json: Value,
    pub all_attempt_outcomes_json: Value,
    pub replay_eligible: bool,
    pub replay_count: i32,
    pub discarded_at: Option<DateTime<Utc>>,
    pub discard_reason: Option<String>,
}

fn row_to_dead_letter(row: sqlx::postgres::PgRow) -> Result<DeadLetterRow> {
    Ok(DeadLetterRow {
        id: row.try_get("id")?,
        delivery_request_id: row.try_get("delivery_request_id")?,
        quarantine_reason: row.try_get("quarantine_reason")?,
        error_class: row.try_get("error_class")?,
        error_summary: row.try_get("error_summary")?,
        total_attempts: row.try_get("total_attempts")?,
        first_attempt_at: row.try_get("first_attempt_at")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
        original_envelope_json: crate::normalize_jsonb(row.try_get("original_envelope_json")?),
        all_attempt_outcomes_json: crate::normalize_jsonb(row.try_get("all_attempt_outcomes_json")?),
        replay_eligible: row.try_get("replay_eligible")?,
        replay_count: row.try_get("replay_count")?,
        discarded_at: row.try_get("discarded_at")?,
        discard_reason: row.try_get("discard_reason")?,
    })
}

const DEAD_LETTER_COLUMNS: &str = "id, delivery_request_id, quarantine_reason, error_class, error_summary, \
    total_attempts, first_attempt_at, last_attempt_at, original_envelope_json, all_attempt_outcomes_json, \
    replay_eligible, replay_count, discarded_at, discard_reason";

pub struct NewDeadLetter {
    pub delivery_request_id: Uuid,
    pub quarantine_reason: String,
    pub error_class: String,
    pub error_summary: String,
    pub total_attempts: i32,
    pub first_attempt_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    pub original_envelope_json: Value,
    pub all_attempt_outcomes_json: Value,
}

pub async fn create_dead_letter(pool: &PgPool, dl: NewDeadLetter) -> Result<DeadLetterRow> {
    let row = sqlx::query(&format!(
        r#"
        insert into dead_letter (
            delivery_request_id, quarantine_reason, error_class, error_summary,
            total_attempts, first_attempt_at, last_attempt_at,
            original_envelope_json, all_attempt_outcomes_json
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        returning {DEAD_LETTER_COLUMNS}
        "#
    ))
    .bind(dl.delivery_request_id)
    .bind(&dl.quarantine_reason)
    .bind(&dl.error_class)
    .bind(&dl.error_summary)
    .bind(dl.total_attempts)
    .bind(dl.first_attempt_at)
    .bind(dl.last_attempt_at)
    .bind(dl.original_envelope_json)
    .bind(dl.all_attempt_outcomes_json)
    .fetch_one(pool)
    .await
    .context("dead_letter insert failed")?;
    row_to_dead_letter(row)
}

pub async fn fetch_dead_letter(pool: &PgPool, id: i64) -> Result<Option<DeadLetterRow>> {
    let row = sqlx::query(&format!("select {DEAD_LETTER_COLUMNS} from dead_letter where id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("dead_letter fetch failed")?;
    row.map(row_to_dead_letter).transpose()
}

pub async fn list_dead_letters(
    pool: &PgPool,
    include_discarded: bool,
    channel: Option<&str>,
    origin_butler: Option<&str>,
    error_class: Option<&str>,
    since: Option<DateTime<Utc>>,
    limit: i64,
) -> Result<Vec<DeadLetterRow>> {
    let rows = sqlx::query(&format!(
        r#"
        select dl.id, dl.delivery_request_id, dl.quarantine_reason, dl.error_class, dl.error_summary,
               dl.total_attempts, dl.first_attempt_at, dl.last_attempt_at,
               dl.original_envelope_json, dl.all_attempt_outcomes_json,
               dl.replay_eligible, dl.replay_count, dl.discarded_at, dl.discard_reason
        from dead_letter dl
        join delivery_request dr on dr.id = dl.delivery_request_id
        where ($1 or dl.discarded_at is null)
          and ($2::text is null or dr.channel = $2)
          and ($3::text is null or dr.origin_butler = $3)
          and ($4::text is null or dl.error_class = $4)
          and ($5::timestamptz is null or dl.first_attempt_at >= $5)
        order by dl.id desc
        limit $6
        "#
    ))
    .bind(include_discarded)
    .bind(channel)
    .bind(origin_butler)
    .bind(error_class)
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("dead_letter list failed")?;
    rows.into_iter().map(row_to_dead_letter).collect()
}

/// Atomically increment `replay_count`, returning the new count. Used by
/// replay so the derived idempotency key suffix (`::replay-N`) is computed
/// from a value that can never be reused by a racing replay call.
pub async fn increment_replay_count(pool: &PgPool, id: i64) -> Result<i32> {
    let row: (i32,) = sqlx::query_as(
        r#"
        update dead_letter
           set replay_count = replay_count + 1
         where id = $1
        returning replay_count
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .context("dead_letter increment_replay_count failed")?;
    Ok(row.0)
}

/// Permanent: sets `replay_eligible=false`, stamps `discarded_at`/`discard_reason`.
/// Rejects (returns `false`) if already discarded, preserving the original reason.
pub async fn discard(pool: &PgPool, id: i64, reason: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        update dead_letter
           set replay_eligible = false,
               discarded_at    = now(),
               discard_reason  = $2
         where id = $1
           and discarded_at is null
        "#,
    )
    .bind(id)
    .bind(reason)
    .execute(pool)
    .await
    .context("dead_letter discard failed")?;
    Ok(result.rows_affected() > 0)
}
