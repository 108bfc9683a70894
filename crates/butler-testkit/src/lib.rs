//! Deterministic in-memory test doubles for the daemon's two injected
//! boundaries: the LLM session adapter (`SdkQuery`) and the outbound
//! channel adapter (`ChannelProvider`). Kept as a dev-dependency only
//! (see each crate's `[dev-dependencies]`) so neither leaks into a
//! production build.

mod fake_channel;
mod fake_query;

pub use fake_channel::{FakeChannelProvider, RecordedSend};
pub use fake_query::{FakeSdkQuery, RecordedQuery};
