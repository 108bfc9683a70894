use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::trace::TraceContext;

// ---------------------------------------------------------------------------
// route.v1
// ---------------------------------------------------------------------------

/// Identifies the originating accept call; carried end to end so the
/// background process phase (and any recovery pass) can be joined back to
/// it by `request_id` alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub received_at: DateTime<Utc>,
    pub source_channel: String,
    pub source_endpoint_identity: String,
    pub source_sender_identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouteInput {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl RouteInput {
    /// A `notify.v1` payload nested at `input.context.notify_request`, if
    /// present. This is the only field of `context` the core substrate
    /// itself inspects; everything else is opaque business payload.
    pub fn notify_request(&self) -> Option<NotifyEnvelope> {
        self.context
            .as_ref()?
            .get("notify_request")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

/// The envelope carried by the one reserved tool, `route.execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEnvelope {
    pub schema_version: String,
    pub request_context: RequestContext,
    pub input: RouteInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_context: Option<TraceContext>,
}

impl RouteEnvelope {
    pub fn new(request_context: RequestContext, input: RouteInput) -> Self {
        Self {
            schema_version: crate::schema_version::ROUTE_V1.to_string(),
            request_context,
            input,
            trace_context: None,
        }
    }

    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace_context = Some(trace);
        self
    }
}

// ---------------------------------------------------------------------------
// notify.v1
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyIntent {
    Send,
    Reply,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyDelivery {
    pub intent: NotifyIntent,
    pub channel: String,
    pub message: String,
    pub recipient: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

/// Carried inside `route.execute`'s `input.context.notify_request` when a
/// specialist butler asks the messenger to deliver on its behalf (spec
/// §4.K — the only legal path to channel egress for non-messenger butlers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyEnvelope {
    pub schema_version: String,
    pub origin_butler: String,
    pub delivery: NotifyDelivery,
}

impl NotifyEnvelope {
    pub fn new(origin_butler: impl Into<String>, delivery: NotifyDelivery) -> Self {
        Self {
            schema_version: crate::schema_version::NOTIFY_V1.to_string(),
            origin_butler: origin_butler.into(),
            delivery,
        }
    }
}

// ---------------------------------------------------------------------------
// ingest.v1
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSource {
    pub channel: String,
    pub provider: String,
    pub endpoint_identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEvent {
    pub external_event_id: String,
    pub observed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_thread_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSender {
    pub identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IngestPayload {
    #[serde(default)]
    pub raw: Value,
    #[serde(default)]
    pub normalized_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestControl {
    pub idempotency_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_tier: Option<String>,
}

/// The envelope the switchboard's `ingest` tool accepts from every external
/// channel connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEnvelope {
    pub schema_version: String,
    pub source: IngestSource,
    pub event: IngestEvent,
    pub sender: IngestSender,
    pub payload: IngestPayload,
    pub control: IngestControl,
}

impl IngestEnvelope {
    pub fn idempotency_key(&self) -> &str {
        &self.control.idempotency_key
    }

    /// `(source, event.external_event_id)` pair used as the secondary
    /// dedup key alongside `control.idempotency_key` (spec §6).
    pub fn source_event_pair(&self) -> (String, String) {
        (
            format!(
                "{}:{}:{}",
                self.source.channel, self.source.provider, self.source.endpoint_identity
            ),
            self.event.external_event_id.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_request_roundtrips_through_route_context() {
        let notify = NotifyEnvelope::new(
            "health",
            NotifyDelivery {
                intent: NotifyIntent::Send,
                channel: "telegram".to_string(),
                message: "hi".to_string(),
                recipient: "user123".to_string(),
                subject: None,
            },
        );
        let context = serde_json::json!({ "notify_request": notify });
        let input = RouteInput {
            prompt: String::new(),
            context: Some(context),
        };
        let parsed = input.notify_request().expect("notify_request present");
        assert_eq!(parsed.origin_butler, "health");
        assert_eq!(parsed.delivery.recipient, "user123");
    }

    #[test]
    fn notify_request_absent_when_context_missing() {
        let input = RouteInput::default();
        assert!(input.notify_request().is_none());
    }
}
