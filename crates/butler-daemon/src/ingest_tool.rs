//! `ingest` (§6, §4.E): the switchboard's one entry point for externally
//! observed events. Validates `ingest.v1`, dedupes on both
//! `control.idempotency_key` and `(source, event.external_event_id)`,
//! persists to `route_inbox` as `accepted`, and enqueues into the daemon's
//! [`butler_buffer::DurableBuffer`]. Only ever registered on the switchboard
//! (`main.rs` gates this the same way `route_tool.rs` gates the messenger's
//! synchronous delivery path).

use std::sync::Arc;

use async_trait::async_trait;
use butler_buffer::{DurableBuffer, MessageRef, Processor};
use butler_db::route_inbox;
use butler_rpc::Tool;
use butler_schemas::schema_version::INGEST_V1;
use butler_schemas::{ErrorKind, IngestEnvelope, ToolError};
use butler_spawner::{SdkQuery, SessionOptions, Spawner};
use serde_json::Value;
use sqlx::PgPool;

pub const INGEST_TOOL: &str = "ingest";

pub struct IngestTool {
    pool: PgPool,
    buffer: Arc<DurableBuffer>,
}

impl IngestTool {
    pub fn new(pool: PgPool, buffer: Arc<DurableBuffer>) -> Self {
        Self { pool, buffer }
    }
}

#[async_trait]
impl Tool for IngestTool {
    fn name(&self) -> &str {
        INGEST_TOOL
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let envelope: IngestEnvelope = serde_json::from_value(args)
            .map_err(|e| ToolError::new(ErrorKind::ValidationError, format!("malformed ingest.v1 envelope: {e}")))?;

        if envelope.schema_version != INGEST_V1 {
            return Err(ToolError::new(
                ErrorKind::ValidationError,
                format!("unsupported ingest schema_version '{}'", envelope.schema_version),
            ));
        }

        let idempotency_key = envelope.idempotency_key().to_string();
        let (source_channel, source_event) = envelope.source_event_pair();
        let source_event_key = format!("{source_channel}::{source_event}");
        let normalized_text = envelope.payload.normalized_text.clone();

        let envelope_json = serde_json::to_value(&envelope)
            .map_err(|e| ToolError::new(ErrorKind::InternalError, format!("envelope serialization failed: {e}")))?;

        let (inbox_id, fresh) = route_inbox::insert_accepted_deduped(&self.pool, envelope_json, &idempotency_key, &source_event_key)
            .await
            .map_err(|e| ToolError::new(ErrorKind::InternalError, format!("route_inbox insert failed: {e}")))?;

        if fresh {
            let enqueued = self.buffer.enqueue(MessageRef { inbox_id, normalized_text });
            if !enqueued {
                tracing::warn!(inbox_id = %inbox_id, "ingest buffer backpressure, row stays accepted for scanner recovery");
            }
        }

        Ok(serde_json::json!({
            "status": "accepted",
            "inbox_id": inbox_id,
            "duplicate": !fresh,
        }))
    }
}

/// Drives one dequeued message through the spawner, the same
/// accept-claim-trigger-terminal shape [`crate::route_tool`] uses for its
/// own background process phase (§4.F). Fuller classification (triage
/// fast-path, routing to a target butler) is a separate concern this
/// processor does not yet own.
pub struct IngestProcessor<Q: SdkQuery> {
    spawner: Arc<Spawner<Q>>,
}

impl<Q: SdkQuery> IngestProcessor<Q> {
    pub fn new(spawner: Arc<Spawner<Q>>) -> Self {
        Self { spawner }
    }
}

#[async_trait]
impl<Q: SdkQuery + 'static> Processor for IngestProcessor<Q> {
    async fn process(&self, msg: MessageRef) -> Result<String, String> {
        let options = SessionOptions {
            trigger_source: "ingest".to_string(),
            request_id: Some(msg.inbox_id.to_string()),
            extra: None,
        };
        let result = self.spawner.trigger(msg.normalized_text, options).await;
        if result.success {
            Ok(result.session_id.to_string())
        } else {
            Err(result.error.unwrap_or_else(|| "unknown error".to_string()))
        }
    }
}
