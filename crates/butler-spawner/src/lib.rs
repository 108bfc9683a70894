//! Owns one butler's concurrent LLM session lifetimes: trigger, graceful
//! stop-accepting, and timeout-driven drain with cancellation (§4.D).

pub mod session;
pub mod spawner;

pub use session::{SdkQuery, SessionOptions, SessionOutcome};
pub use spawner::{Spawner, TriggerResult};
