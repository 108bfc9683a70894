//! Switchboard ingestion buffer: bounded queue, worker pool, and periodic
//! DB scanner recovery (§4.E). Grounded on `route_inbox`'s accept-then-
//! process lifecycle (§4.F) — the switchboard uses this buffer in place of
//! the per-accept background task every other butler spawns.

pub mod buffer;
pub mod message_ref;
pub mod processor;
pub mod stats;

pub use buffer::{scanner_sweep, BufferConfig, DurableBuffer};
pub use message_ref::MessageRef;
pub use processor::Processor;
pub use stats::StatsSnapshot;
