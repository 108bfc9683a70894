//! `route.execute` (§4.F): the one reserved tool every butler understands.
//! On the messenger, a `notify_request` payload takes a synchronous
//! delivery path instead of the normal accept/process split (§4.F
//! "Messenger exception", §4.K egress ownership).

use std::sync::Arc;

use async_trait::async_trait;
use butler_db::route_inbox;
use butler_delivery::{deliver, DeliveryOutcomeSummary};
use butler_egress_guard::should_route_notify_to_spawner;
use butler_rpc::Tool;
use butler_schemas::{ErrorKind, NotifyIntent, RouteEnvelope, ToolError, TraceContext};
use butler_spawner::{SdkQuery, SessionOptions, Spawner};
use butler_telemetry::{accept_span, process_span};
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

use crate::state::AppState;

/// Every delivery the messenger sends on a specialist's behalf is
/// attributed to the bot identity, not the human operator's own session —
/// `notify_request` carries no identity scope of its own, so this is the
/// fixed default rather than something derived per call.
const NOTIFY_IDENTITY_SCOPE: &str = "bot";

pub struct RouteExecuteTool<Q: SdkQuery> {
    state: Arc<AppState<Q>>,
}

impl<Q: SdkQuery> RouteExecuteTool<Q> {
    pub fn new(state: Arc<AppState<Q>>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl<Q: SdkQuery + 'static> Tool for RouteExecuteTool<Q> {
    fn name(&self) -> &str {
        butler_rpc::ROUTE_EXECUTE_TOOL
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let envelope: RouteEnvelope = serde_json::from_value(args)
            .map_err(|e| ToolError::new(ErrorKind::ValidationError, format!("malformed route.execute envelope: {e}")))?;

        let notify_request = envelope.input.notify_request();
        if self.state.is_messenger() {
            if let Some(notify) = notify_request {
                return deliver_synchronously(&self.state, notify).await;
            }
        } else if notify_request.is_some() && should_route_notify_to_spawner(self.state.butler_name(), true) {
            // Never a direct channel adapter: hands off to its own spawner
            // like any other prompt, via the normal accept path below (§4.K).
            tracing::debug!(butler = self.state.butler_name(), "notify_request routed to spawner, not delivered directly");
        }

        accept(&self.state, envelope).await
    }
}

async fn deliver_synchronously<Q: SdkQuery>(
    state: &Arc<AppState<Q>>,
    notify: butler_schemas::NotifyEnvelope,
) -> Result<Value, ToolError> {
    let limiter = state.rate_limiter.as_ref().ok_or_else(|| {
        ToolError::new(ErrorKind::InternalError, "messenger butler has no rate limiter configured")
    })?;
    let provider = state.delivery_provider.as_ref().ok_or_else(|| {
        ToolError::new(ErrorKind::InternalError, "messenger butler has no delivery provider configured")
    })?;

    let delivery = &notify.delivery;
    let admission = limiter.check_admission(
        &delivery.channel,
        NOTIFY_IDENTITY_SCOPE,
        &delivery.recipient,
        delivery.intent,
        &notify.origin_butler,
    );
    if !admission.admitted {
        let class = admission.error_class.as_deref().unwrap_or("overload_rejected");
        let kind = match class {
            "target_unavailable" => ErrorKind::TargetUnavailable,
            _ => ErrorKind::OverloadRejected,
        };
        return Err(ToolError::new(kind, format!("admission rejected: {class}")));
    }

    // Deterministic from content, not a random or time-based id: a retried
    // call with the same origin/channel/recipient/intent/message collapses
    // onto the same `delivery_request` row instead of double-sending.
    let idempotency_seed = format!(
        "notify:{}:{}:{}:{}:{}",
        notify.origin_butler,
        delivery.channel,
        delivery.recipient,
        match delivery.intent {
            NotifyIntent::Send => "send",
            NotifyIntent::Reply => "reply",
        },
        delivery.message,
    );
    let idempotency_key = Uuid::new_v5(&Uuid::NAMESPACE_OID, idempotency_seed.as_bytes()).to_string();

    let (request_row, _inserted) = butler_db::delivery::enqueue(
        &state.pool,
        butler_db::delivery::NewDeliveryRequest {
            idempotency_key,
            origin_butler: notify.origin_butler.clone(),
            channel: delivery.channel.clone(),
            intent: match delivery.intent {
                NotifyIntent::Send => "send".to_string(),
                NotifyIntent::Reply => "reply".to_string(),
            },
            target_identity: delivery.recipient.clone(),
            message_content: delivery.message.clone(),
        },
    )
    .await
    .map_err(|e| ToolError::new(ErrorKind::InternalError, format!("delivery_request enqueue failed: {e}")))?;

    let outcome = deliver(&state.pool, provider, &state.delivery_config, &request_row)
        .await
        .map_err(|e| ToolError::new(ErrorKind::InternalError, format!("delivery failed: {e}")));

    limiter.release(&delivery.channel, NOTIFY_IDENTITY_SCOPE, &delivery.recipient);

    let outcome = outcome?;
    Ok(serde_json::json!({
        "status": match outcome {
            DeliveryOutcomeSummary::Delivered => "delivered",
            DeliveryOutcomeSummary::DeadLettered => "dead_lettered",
        },
        "delivery_request_id": request_row.id,
    }))
}

async fn accept<Q: SdkQuery + 'static>(state: &Arc<AppState<Q>>, envelope: RouteEnvelope) -> Result<Value, ToolError> {
    let accepted_at = Utc::now();
    let request_id = envelope.request_context.request_id;
    let inbound_trace = envelope.trace_context.clone();
    let envelope_json = serde_json::to_value(&envelope)
        .map_err(|e| ToolError::new(ErrorKind::InternalError, format!("envelope serialization failed: {e}")))?;

    let inbox_id = route_inbox::insert_accepted(&state.pool, envelope_json)
        .await
        .map_err(|e| ToolError::new(ErrorKind::InternalError, format!("route_inbox insert failed: {e}")))?;

    let (accept_span, accept_ctx) = accept_span(&request_id.to_string(), inbound_trace);
    let _entered = accept_span.enter();

    let pool = state.pool.clone();
    let spawner = state.spawner.clone();
    let prompt = envelope.input.prompt.clone();
    tokio::spawn(process_inbox_row(pool, spawner, inbox_id, prompt, request_id, accept_ctx));

    Ok(serde_json::json!({
        "status": "accepted",
        "inbox_id": inbox_id,
        "timing": {
            "accepted_at": accepted_at,
            "latency_target_ms": 50,
        },
        "request_context": envelope.request_context,
    }))
}

/// Background process phase (§4.F step 2). Also used by
/// [`crate::recovery::recover_route_inbox`] for rows recovered after a
/// crash, with a fresh root trace context standing in for the (now gone)
/// accept span.
async fn process_inbox_row<Q: SdkQuery + 'static>(
    pool: PgPool,
    spawner: Arc<Spawner<Q>>,
    inbox_id: Uuid,
    prompt: String,
    request_id: Uuid,
    accept_ctx: TraceContext,
) {
    let (span, _ctx) = process_span(&request_id.to_string(), &accept_ctx);
    run_process(pool, spawner, inbox_id, prompt, request_id).instrument(span).await
}

async fn run_process<Q: SdkQuery + 'static>(
    pool: PgPool,
    spawner: Arc<Spawner<Q>>,
    inbox_id: Uuid,
    prompt: String,
    request_id: Uuid,
) {
    let claimed = match route_inbox::mark_processing(&pool, inbox_id).await {
        Ok(claimed) => claimed,
        Err(e) => {
            tracing::error!(inbox_id = %inbox_id, error = %e, "failed to mark route_inbox row processing");
            return;
        }
    };
    if !claimed {
        tracing::debug!(inbox_id = %inbox_id, "route_inbox row already claimed, skipping");
        return;
    }

    let options = SessionOptions {
        trigger_source: "route".to_string(),
        request_id: Some(request_id.to_string()),
        extra: None,
    };
    let result = spawner.trigger(prompt, options).await;

    let outcome = if result.success {
        route_inbox::mark_processed(&pool, inbox_id, &result.session_id.to_string()).await
    } else {
        route_inbox::mark_errored(&pool, inbox_id, result.error.as_deref().unwrap_or("unknown error")).await
    };

    if let Err(e) = outcome {
        tracing::error!(inbox_id = %inbox_id, error = %e, "failed to record route_inbox terminal state");
    }
}

pub(crate) async fn spawn_recovered<Q: SdkQuery + 'static>(
    pool: PgPool,
    spawner: Arc<Spawner<Q>>,
    inbox_id: Uuid,
    prompt: String,
    request_id: Uuid,
    accept_ctx: TraceContext,
) {
    process_inbox_row(pool, spawner, inbox_id, prompt, request_id, accept_ctx).await
}
