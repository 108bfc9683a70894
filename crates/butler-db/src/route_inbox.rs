//! `route_inbox`: the accept-then-process ledger (§4.F). Lifecycle is
//! monotonic, `accepted -> processing -> (processed|errored)`; grounded on
//! the teacher's `oms_inbox` insert-then-apply-then-recover shape. A plain
//! `route.execute` accept (`insert_accepted`) carries no dedupe key — those
//! rows are never re-submitted by a peer, only recovered by this daemon's
//! own scanner. The switchboard's ingest tool accepts externally-resubmitted
//! envelopes instead, so its accept path (`insert_accepted_deduped`) carries
//! two dedupe keys (`control.idempotency_key` and the `(source,
//! external_event_id)` pair, §6), grounded on `delivery_request`'s
//! `on conflict do nothing ... returning` idempotent-enqueue shape.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteInboxLifecycle {
    Accepted,
    Processing,
    Processed,
    Errored,
}

impl RouteInboxLifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Errored => "errored",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "accepted" => Ok(Self::Accepted),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "errored" => Ok(Self::Errored),
            other => Err(anyhow::anyhow!("invalid route_inbox lifecycle_state: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteInboxRow {
    pub id: Uuid,
    pub envelope_json: Value,
    pub lifecycle_state: RouteInboxLifecycle,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub error: Option<String>,
    pub idempotency_key: Option<String>,
    pub source_event_key: Option<String>,
}

const INBOX_COLUMNS: &str = "id, envelope_json, lifecycle_state, received_at, processed_at, \
    session_id, error, idempotency_key, source_event_key";

fn row_to_inbox(row: sqlx::postgres::PgRow) -> Result<RouteInboxRow> {
    Ok(RouteInboxRow {
        id: row.try_get("id")?,
        envelope_json: crate::normalize_jsonb(row.try_get("envelope_json")?),
        lifecycle_state: RouteInboxLifecycle::parse(&row.try_get::<String, _>("lifecycle_state")?)?,
        received_at: row.try_get("received_at")?,
        processed_at: row.try_get("processed_at")?,
        session_id: row.try_get("session_id")?,
        error: row.try_get("error")?,
        idempotency_key: row.try_get("idempotency_key")?,
        source_event_key: row.try_get("source_event_key")?,
    })
}

/// Accept phase: persist the inbox row. Always starts in `accepted`. No
/// dedupe key — used by `route.execute`, which is never re-submitted by a
/// peer.
pub async fn insert_accepted(pool: &PgPool, envelope_json: Value) -> Result<Uuid> {
    let row: (Uuid,) = sqlx::query_as(
        r#"
        insert into route_inbox (envelope_json, lifecycle_state)
        values ($1, 'accepted')
        returning id
        "#,
    )
    .bind(envelope_json)
    .fetch_one(pool)
    .await
    .context("route_inbox insert failed")?;
    Ok(row.0)
}

/// Accept phase for the switchboard's ingest tool (§6): idempotent on both
/// `idempotency_key` and `source_event_key`. `on conflict do nothing` with no
/// explicit target catches a violation on either unique index; the second
/// half re-reads the row that already claimed one of the two keys. Returns
/// `(inbox_id, fresh)`; `fresh=false` means this exact envelope was already
/// accepted and no new row was inserted.
pub async fn insert_accepted_deduped(
    pool: &PgPool,
    envelope_json: Value,
    idempotency_key: &str,
    source_event_key: &str,
) -> Result<(Uuid, bool)> {
    let inserted: Option<(Uuid,)> = sqlx::query_as(
        r#"
        insert into route_inbox (envelope_json, lifecycle_state, idempotency_key, source_event_key)
        values ($1, 'accepted', $2, $3)
        on conflict do nothing
        returning id
        "#,
    )
    .bind(envelope_json)
    .bind(idempotency_key)
    .bind(source_event_key)
    .fetch_optional(pool)
    .await
    .context("route_inbox deduped insert failed")?;

    if let Some((id,)) = inserted {
        return Ok((id, true));
    }

    let existing: (Uuid,) = sqlx::query_as(
        r#"
        select id from route_inbox
        where idempotency_key = $1 or source_event_key = $2
        order by received_at asc
        limit 1
        "#,
    )
    .bind(idempotency_key)
    .bind(source_event_key)
    .fetch_one(pool)
    .await
    .context("route_inbox dedup conflict but row missing on reread")?;
    Ok((existing.0, false))
}

pub async fn fetch(pool: &PgPool, id: Uuid) -> Result<Option<RouteInboxRow>> {
    let row = sqlx::query(&format!("select {INBOX_COLUMNS} from route_inbox where id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("route_inbox fetch failed")?;

    row.map(row_to_inbox).transpose()
}

/// `accepted -> processing`. Returns `false` if the row wasn't in `accepted`
/// (e.g. a concurrent recovery pass already claimed it).
pub async fn mark_processing(pool: &PgPool, id: Uuid) -> Result<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update route_inbox
           set lifecycle_state = 'processing'
         where id = $1
           and lifecycle_state = 'accepted'
        returning id
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("route_inbox mark_processing failed")?;
    Ok(row.is_some())
}

/// `processing -> processed`, stamping `processed_at` and `session_id`.
pub async fn mark_processed(pool: &PgPool, id: Uuid, session_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        update route_inbox
           set lifecycle_state = 'processed',
               processed_at    = now(),
               session_id      = $2
         where id = $1
        "#,
    )
    .bind(id)
    .bind(session_id)
    .execute(pool)
    .await
    .context("route_inbox mark_processed failed")?;
    Ok(())
}

/// `processing -> errored`, stamping `processed_at` and the stringified error.
pub async fn mark_errored(pool: &PgPool, id: Uuid, error: &str) -> Result<()> {
    sqlx::query(
        r#"
        update route_inbox
           set lifecycle_state = 'errored',
               processed_at    = now(),
               error           = $2
         where id = $1
        "#,
    )
    .bind(id)
    .bind(error)
    .execute(pool)
    .await
    .context("route_inbox mark_errored failed")?;
    Ok(())
}

/// Recovery query: rows stuck in `accepted` past `grace_seconds`, oldest
/// first. Used both by the durable buffer's periodic scanner (§4.E) and by
/// startup recovery on non-switchboard butlers (§4.F).
pub async fn list_stale_accepted(
    pool: &PgPool,
    grace_seconds: i64,
    limit: i64,
) -> Result<Vec<RouteInboxRow>> {
    let rows = sqlx::query(&format!(
        r#"
        select {INBOX_COLUMNS}
        from route_inbox
        where lifecycle_state = 'accepted'
          and received_at < now() - make_interval(secs => $1)
        order by received_at asc
        limit $2
        "#
    ))
    .bind(grace_seconds as f64)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("route_inbox list_stale_accepted failed")?;

    rows.into_iter().map(row_to_inbox).collect()
}

/// All rows currently `accepted`, regardless of age — used by non-switchboard
/// startup recovery, which re-enqueues every accepted row rather than only
/// ones past a grace window (§4.F `_recover_route_inbox`).
pub async fn list_all_accepted(pool: &PgPool) -> Result<Vec<RouteInboxRow>> {
    let rows = sqlx::query(&format!(
        r#"
        select {INBOX_COLUMNS}
        from route_inbox
        where lifecycle_state = 'accepted'
        order by received_at asc
        "#
    ))
    .fetch_all(pool)
    .await
    .context("route_inbox list_all_accepted failed")?;

    rows.into_iter().map(row_to_inbox).collect()
}
