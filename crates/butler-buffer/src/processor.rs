use async_trait::async_trait;

use crate::message_ref::MessageRef;

/// Processes one dequeued message reference. `Ok(session_id)` marks the
/// inbox row `processed`; `Err(reason)` marks it `errored`. Implementations
/// must not panic — a panicking worker would take the whole buffer down,
/// unlike a caught error which only affects this one message.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, msg: MessageRef) -> Result<String, String>;
}
