use serde::{Deserialize, Serialize};

/// Distributed-trace carrier propagated across the accept→process async
/// boundary (and over the wire between butlers). Mirrors the W3C traceparent
/// shape closely enough to hand to a real OpenTelemetry exporter later
/// without a wire format change, while staying a plain struct for now (see
/// DESIGN.md for why no OTel collector is wired up here).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
}

impl TraceContext {
    pub fn new(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
        }
    }
}
