//! Deterministic `SdkQuery` adapter for spawner tests.
//!
//! Fill model is "respond from a caller-supplied script, or echo the prompt
//! if the script is empty" — no randomness, no network I/O, same discipline
//! the teacher's paper broker applied to order fills.

use async_trait::async_trait;
use butler_spawner::{SdkQuery, SessionOptions, SessionOutcome};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// One recorded `query` call, for scenario tests to assert against.
#[derive(Clone, Debug)]
pub struct RecordedQuery {
    pub prompt: String,
    pub trigger_source: String,
    pub request_id: Option<String>,
}

/// Deterministic `SdkQuery`: returns a queued response per call (FIFO), or
/// echoes the prompt back as `{"echo": prompt}` once the queue is empty.
/// Every call is recorded for later inspection.
pub struct FakeSdkQuery {
    responses: Mutex<Vec<SessionOutcome>>,
    calls: Mutex<Vec<RecordedQuery>>,
}

impl Default for FakeSdkQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSdkQuery {
    pub fn new() -> Self {
        Self { responses: Mutex::new(Vec::new()), calls: Mutex::new(Vec::new()) }
    }

    /// Queue a response for the next `query` call, in call order.
    pub fn push_response(&self, outcome: SessionOutcome) {
        self.responses.lock().push(outcome);
    }

    pub fn calls(&self) -> Vec<RecordedQuery> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl SdkQuery for FakeSdkQuery {
    async fn query(&self, prompt: &str, options: &SessionOptions, _cancel: CancellationToken) -> SessionOutcome {
        self.calls.lock().push(RecordedQuery {
            prompt: prompt.to_string(),
            trigger_source: options.trigger_source.clone(),
            request_id: options.request_id.clone(),
        });

        let queued = {
            let mut guard = self.responses.lock();
            if guard.is_empty() {
                None
            } else {
                Some(guard.remove(0))
            }
        };

        queued.unwrap_or_else(|| SessionOutcome::ok(Value::String(format!("echo: {prompt}"))))
    }
}
