//! Tracing setup and accept→process trace correlation (§4.M).
//!
//! Two spans share one trace: the accept span ends before `route.execute`
//! returns, the process span runs later inside the background task. Joining
//! them back up (for cross-trace audit, even across a retry or a recovery
//! pass) only needs `request_id`, but both spans also carry a `TraceContext`
//! so a real exporter can be dropped in later without a wire format change.

use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use uuid::Uuid;

pub use butler_schemas::TraceContext;

/// Matches the teacher's `init_tracing`: `RUST_LOG`-driven `EnvFilter`,
/// falling back to `info` when unset or invalid.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

pub type HttpTraceLayer = TraceLayer<SharedClassifier<ServerErrorsAsFailures>, DefaultMakeSpan, DefaultOnResponse>;

/// Same `TraceLayer` construction the teacher wires into its axum router.
pub fn http_trace_layer() -> HttpTraceLayer {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
}

fn new_id(hex_len: usize) -> String {
    let full = Uuid::new_v4().simple().to_string();
    full[..hex_len].to_string()
}

/// Starts a new trace: 128-bit trace id, 64-bit span id, both lowercase hex
/// (matches `TraceContext`'s W3C-traceparent-shaped fields).
pub fn new_root_trace_context() -> TraceContext {
    TraceContext::new(new_id(32), new_id(16))
}

/// A child context within the same trace: keeps `trace_id`, mints a fresh
/// `span_id`.
pub fn child_trace_context(parent: &TraceContext) -> TraceContext {
    TraceContext::new(parent.trace_id.clone(), new_id(16))
}

/// Creates the accept span (`butler.tool.route.execute`). Continues
/// `inbound` if the call arrived with a trace context already attached,
/// otherwise starts a new trace. Returns the context to carry forward into
/// `route.v1`'s `trace_context` field and, later, into [`process_span`].
pub fn accept_span(request_id: &str, inbound: Option<TraceContext>) -> (tracing::Span, TraceContext) {
    let ctx = inbound.unwrap_or_else(new_root_trace_context);
    let span = tracing::info_span!(
        "butler.tool.route.execute",
        request_id = %request_id,
        trace_id = %ctx.trace_id,
        span_id = %ctx.span_id,
    );
    (span, ctx)
}

/// Creates the process span (`route.process`) inside the background task.
/// Continues `accept`'s trace id under a fresh span id, and records a
/// span-link back to the accept span's `(trace_id, span_id)` via the
/// `linked_span_id` field, since the accept span has already closed by the
/// time this one starts and so can't be its real parent.
pub fn process_span(request_id: &str, accept: &TraceContext) -> (tracing::Span, TraceContext) {
    let ctx = child_trace_context(accept);
    let span = tracing::info_span!(
        "route.process",
        request_id = %request_id,
        trace_id = %ctx.trace_id,
        span_id = %ctx.span_id,
        linked_trace_id = %accept.trace_id,
        linked_span_id = %accept.span_id,
    );
    (span, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_context_has_distinct_trace_and_span_ids() {
        let ctx = new_root_trace_context();
        assert_eq!(ctx.trace_id.len(), 32);
        assert_eq!(ctx.span_id.len(), 16);
        assert_ne!(ctx.trace_id, ctx.span_id);
    }

    #[test]
    fn two_root_contexts_never_collide() {
        let a = new_root_trace_context();
        let b = new_root_trace_context();
        assert_ne!(a.trace_id, b.trace_id);
    }

    #[test]
    fn child_context_keeps_trace_id_and_mints_new_span_id() {
        let parent = new_root_trace_context();
        let child = child_trace_context(&parent);
        assert_eq!(child.trace_id, parent.trace_id);
        assert_ne!(child.span_id, parent.span_id);
    }

    #[test]
    fn accept_without_inbound_starts_a_new_trace() {
        let (_span, ctx) = accept_span("req-1", None);
        assert_eq!(ctx.trace_id.len(), 32);
    }

    #[test]
    fn accept_with_inbound_continues_the_supplied_trace() {
        let inbound = new_root_trace_context();
        let (_span, ctx) = accept_span("req-1", Some(inbound.clone()));
        assert_eq!(ctx, inbound);
    }

    #[test]
    fn process_continues_accept_trace_id_under_a_new_span_id() {
        let (_accept_span, accept_ctx) = accept_span("req-1", None);
        let (_process_span, process_ctx) = process_span("req-1", &accept_ctx);
        assert_eq!(process_ctx.trace_id, accept_ctx.trace_id);
        assert_ne!(process_ctx.span_id, accept_ctx.span_id);
    }

    #[test]
    fn trace_context_roundtrips_through_json() {
        let ctx = new_root_trace_context();
        let json = serde_json::to_value(&ctx).unwrap();
        let back: TraceContext = serde_json::from_value(json).unwrap();
        assert_eq!(ctx, back);
    }
}
