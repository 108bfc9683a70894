use std::sync::Arc;
use std::time::Instant;

use butler_db::delivery::{
    self, DeliveryAttemptRow, DeliveryRequestRow, DeliveryStatus, NewDeadLetter,
};
use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;

use crate::backoff::{backoff_delay, DeliveryConfig};
use crate::provider::{AttemptOutcome, ChannelProvider};

#[derive(Debug, Error)]
pub enum DeliverError {
    #[error("db error: {0}")]
    Db(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcomeSummary {
    Delivered,
    DeadLettered,
}

/// Runs one delivery request to a terminal outcome: retries `retryable`
/// and `timeout` attempts with exponential backoff up to
/// `config.retry_budget`, dead-lettering on budget exhaustion or a
/// non-retryable error, recording every attempt along the way (§4.I).
pub async fn deliver(
    pool: &PgPool,
    provider: &Arc<dyn ChannelProvider>,
    config: &DeliveryConfig,
    request: &DeliveryRequestRow,
) -> Result<DeliveryOutcomeSummary, DeliverError> {
    delivery::set_status(pool, request.id, DeliveryStatus::InProgress).await?;

    for attempt_number in 1..=config.retry_budget {
        let attempt = delivery::start_attempt(pool, request.id).await?;
        let started = Instant::now();

        let outcome = provider
            .send(&request.channel, &request.target_identity, &request.intent, &request.message_content)
            .await;

        let latency_ms = started.elapsed().as_millis() as i64;
        delivery::complete_attempt(
            pool,
            attempt.id,
            outcome.db_outcome(),
            latency_ms,
            outcome.error_class(),
            outcome.error_message(),
            outcome.provider_response(),
        )
        .await?;

        if let AttemptOutcome::Success { .. } = outcome {
            delivery::set_status(pool, request.id, DeliveryStatus::Delivered).await?;
            return Ok(DeliveryOutcomeSummary::Delivered);
        }

        let budget_exhausted = attempt_number == config.retry_budget;
        if !outcome.is_retryable() || budget_exhausted {
            dead_letter(pool, request, &outcome, budget_exhausted).await?;
            return Ok(DeliveryOutcomeSummary::DeadLettered);
        }

        tracing::warn!(
            delivery_id = %request.id,
            attempt = attempt_number,
            error_class = outcome.error_class(),
            "delivery attempt failed, backing off"
        );
        tokio::time::sleep(backoff_delay(attempt_number, config)).await;
    }

    unreachable!("loop always returns before exhausting retry_budget + 1 iterations")
}

async fn dead_letter(
    pool: &PgPool,
    request: &DeliveryRequestRow,
    final_outcome: &AttemptOutcome,
    budget_exhausted: bool,
) -> Result<(), DeliverError> {
    let attempts = delivery::list_attempts(pool, request.id).await?;
    let first_attempt_at = attempts.first().map(|a| a.started_at).unwrap_or_else(Utc::now);
    let last_attempt_at = attempts.last().map(|a| a.started_at).unwrap_or_else(Utc::now);

    let error_class = final_outcome.error_class().unwrap_or("unknown").to_string();
    let error_summary = final_outcome.error_message().unwrap_or("no error message").to_string();
    let quarantine_reason = if budget_exhausted {
        format!("retry budget exhausted after {} attempts", attempts.len())
    } else {
        "non-retryable delivery error".to_string()
    };

    delivery::create_dead_letter(
        pool,
        NewDeadLetter {
            delivery_request_id: request.id,
            quarantine_reason,
            error_class: error_class.clone(),
            error_summary,
            total_attempts: attempts.len() as i32,
            first_attempt_at,
            last_attempt_at,
            original_envelope_json: original_envelope_json(request),
            all_attempt_outcomes_json: attempt_outcomes_json(&attempts),
        },
    )
    .await?;

    delivery::set_terminal_error(
        pool,
        request.id,
        DeliveryStatus::DeadLettered,
        &error_class,
        final_outcome.error_message().unwrap_or(""),
    )
    .await?;
    Ok(())
}

fn original_envelope_json(request: &DeliveryRequestRow) -> serde_json::Value {
    serde_json::json!({
        "idempotency_key": request.idempotency_key,
        "origin_butler": request.origin_butler,
        "channel": request.channel,
        "intent": request.intent,
        "target_identity": request.target_identity,
        "message_content": request.message_content,
    })
}

fn attempt_outcomes_json(attempts: &[DeliveryAttemptRow]) -> serde_json::Value {
    serde_json::json!(attempts
        .iter()
        .map(|a| serde_json::json!({
            "attempt_number": a.attempt_number,
            "outcome": a.outcome,
            "error_class": a.error_class,
            "error_message": a.error_message,
            "latency_ms": a.latency_ms,
        }))
        .collect::<Vec<_>>())
}
