use butler_db::delivery::{self, DeadLetterRow, NewDeliveryRequest};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DlqError {
    #[error("dead letter {0} not found")]
    NotFound(i64),
    #[error("not eligible for replay: {reason}")]
    NotEligible { reason: String },
    #[error("discard reason must not be empty")]
    EmptyReason,
    #[error("db error: {0}")]
    Db(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default)]
pub struct ReplayEligibilityAssessment {
    pub eligible: bool,
    pub reasons: Vec<String>,
}

pub fn assess_eligibility(row: &DeadLetterRow) -> ReplayEligibilityAssessment {
    let mut reasons = Vec::new();
    if !row.replay_eligible {
        reasons.push("replay_eligible is false".to_string());
    }
    if row.discarded_at.is_some() {
        reasons.push("row has been discarded".to_string());
    }
    ReplayEligibilityAssessment { eligible: reasons.is_empty(), reasons }
}

#[derive(Debug, Clone)]
pub struct InspectResult {
    pub row: DeadLetterRow,
    pub replay_eligibility_assessment: ReplayEligibilityAssessment,
}

#[derive(Default)]
pub struct ListDeadLettersArgs {
    pub include_discarded: bool,
    pub channel: Option<String>,
    pub origin_butler: Option<String>,
    pub error_class: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

pub async fn list(pool: &PgPool, args: ListDeadLettersArgs) -> Result<Vec<DeadLetterRow>, DlqError> {
    let rows = delivery::list_dead_letters(
        pool,
        args.include_discarded,
        args.channel.as_deref(),
        args.origin_butler.as_deref(),
        args.error_class.as_deref(),
        args.since,
        args.limit.unwrap_or(50),
    )
    .await?;
    Ok(rows)
}

pub async fn inspect(pool: &PgPool, id: i64) -> Result<Option<InspectResult>, DlqError> {
    let Some(row) = delivery::fetch_dead_letter(pool, id).await? else {
        return Ok(None);
    };
    let assessment = assess_eligibility(&row);
    Ok(Some(InspectResult { row, replay_eligibility_assessment: assessment }))
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ReplayResult {
    pub status: &'static str,
    pub replayed_delivery_id: Uuid,
    pub replay_number: i32,
    pub original_dead_letter_id: i64,
}

/// Replays a dead-lettered delivery (§4.I): derives `original_key::replay-N`
/// from the atomically incremented `replay_count`, enqueues a fresh
/// `delivery_request` row in `pending`, and returns the new delivery id.
pub async fn replay(pool: &PgPool, id: i64) -> Result<ReplayResult, DlqError> {
    let row = delivery::fetch_dead_letter(pool, id).await?.ok_or(DlqError::NotFound(id))?;
    let assessment = assess_eligibility(&row);
    if !assessment.eligible {
        return Err(DlqError::NotEligible { reason: assessment.reasons.join("; ") });
    }

    let original = delivery::fetch(pool, row.delivery_request_id)
        .await?
        .ok_or_else(|| DlqError::Db(anyhow::anyhow!("original delivery_request missing for dead letter {id}")))?;

    let replay_number = delivery::increment_replay_count(pool, id).await?;
    let derived_key = format!("{}::replay-{}", original.idempotency_key, replay_number);

    let (new_request, _inserted) = delivery::enqueue(
        pool,
        NewDeliveryRequest {
            idempotency_key: derived_key,
            origin_butler: original.origin_butler,
            channel: original.channel,
            intent: original.intent,
            target_identity: original.target_identity,
            message_content: original.message_content,
        },
    )
    .await?;

    Ok(ReplayResult {
        status: "ok",
        replayed_delivery_id: new_request.id,
        replay_number,
        original_dead_letter_id: id,
    })
}

/// Permanent: no undiscard. Rejects empty reasons and rows already discarded.
pub async fn discard(pool: &PgPool, id: i64, reason: &str) -> Result<(), DlqError> {
    if reason.trim().is_empty() {
        return Err(DlqError::EmptyReason);
    }
    let applied = delivery::discard(pool, id, reason.trim()).await?;
    if !applied {
        let row = delivery::fetch_dead_letter(pool, id).await?.ok_or(DlqError::NotFound(id))?;
        return Err(DlqError::NotEligible {
            reason: format!(
                "already discarded: {}",
                row.discard_reason.unwrap_or_else(|| "no reason recorded".to_string())
            ),
        });
    }
    Ok(())
}
