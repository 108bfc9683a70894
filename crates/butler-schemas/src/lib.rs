//! butler-schemas
//!
//! Wire types shared by every butler daemon: the envelopes that cross the
//! RPC tool boundary (`route.v1`, `notify.v1`, `ingest.v1`), trace
//! correlation, and the tool-error shape every surfaced error collapses
//! into. Pure data — no IO, no business logic.

mod envelope;
mod error;
mod trace;

pub use envelope::{
    IngestControl, IngestEnvelope, IngestEvent, IngestPayload, IngestSender, IngestSource,
    NotifyDelivery, NotifyEnvelope, NotifyIntent, RequestContext, RouteEnvelope, RouteInput,
};
pub use error::{ErrorKind, ToolError};
pub use trace::TraceContext;

/// Schema version tags carried on the wire. Kept as `&'static str` rather
/// than an enum so unknown future versions still deserialize (and so a
/// daemon can reject a mismatched version explicitly instead of refusing to
/// parse at all).
pub mod schema_version {
    pub const ROUTE_V1: &str = "route.v1";
    pub const NOTIFY_V1: &str = "notify.v1";
    pub const INGEST_V1: &str = "ingest.v1";
}
