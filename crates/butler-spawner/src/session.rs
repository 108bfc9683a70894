use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Options passed through to the injected query implementation unchanged.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub trigger_source: String,
    pub request_id: Option<String>,
    pub extra: Option<Value>,
}

/// The outcome an `SdkQuery` implementation produces once its underlying
/// session run finishes, is cancelled, or fails.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl SessionOutcome {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            success: false,
            output: None,
            error: Some("cancelled".to_string()),
        }
    }
}

/// The injected LLM-session adapter. A real implementation streams status
/// messages while it runs and resolves to a final `SessionOutcome`; the
/// spawner only needs the terminal value, so this trait is the narrow slice
/// of that interface the spawner actually depends on, with cancellation
/// wired through an explicit token rather than a stream the spawner would
/// otherwise have to drain.
#[async_trait]
pub trait SdkQuery: Send + Sync {
    async fn query(
        &self,
        prompt: &str,
        options: &SessionOptions,
        cancel: CancellationToken,
    ) -> SessionOutcome;
}
