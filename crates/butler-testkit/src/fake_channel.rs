//! Deterministic `ChannelProvider` for delivery tests, mirroring the
//! teacher's `PaperBroker`: accepts every send, immediately resolves with a
//! caller-scripted outcome, records every attempt. No randomness, no
//! network I/O.

use async_trait::async_trait;
use butler_delivery::{AttemptOutcome, ChannelProvider};
use parking_lot::Mutex;

/// One recorded `send` call, for scenario tests to assert against.
#[derive(Clone, Debug)]
pub struct RecordedSend {
    pub channel: String,
    pub target_identity: String,
    pub intent: String,
    pub message_content: String,
}

/// Deterministic `ChannelProvider`: returns a queued outcome per call (FIFO),
/// or `AttemptOutcome::Success { provider_response: None }` once the queue is
/// empty. Every call is recorded.
pub struct FakeChannelProvider {
    outcomes: Mutex<Vec<AttemptOutcome>>,
    sends: Mutex<Vec<RecordedSend>>,
}

impl Default for FakeChannelProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeChannelProvider {
    pub fn new() -> Self {
        Self { outcomes: Mutex::new(Vec::new()), sends: Mutex::new(Vec::new()) }
    }

    /// Queue an outcome for the next `send` call, in call order.
    pub fn push_outcome(&self, outcome: AttemptOutcome) {
        self.outcomes.lock().push(outcome);
    }

    pub fn sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sends.lock().len()
    }
}

#[async_trait]
impl ChannelProvider for FakeChannelProvider {
    async fn send(&self, channel: &str, target_identity: &str, intent: &str, message_content: &str) -> AttemptOutcome {
        self.sends.lock().push(RecordedSend {
            channel: channel.to_string(),
            target_identity: target_identity.to_string(),
            intent: intent.to_string(),
            message_content: message_content.to_string(),
        });

        let queued = {
            let mut guard = self.outcomes.lock();
            if guard.is_empty() {
                None
            } else {
                Some(guard.remove(0))
            }
        };

        queued.unwrap_or(AttemptOutcome::Success { provider_response: None })
    }
}
