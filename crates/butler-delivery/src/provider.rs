use async_trait::async_trait;
use serde_json::Value;

/// What happened on one send attempt. The adapter never raises a transport
/// exception across this boundary — every outcome, including network
/// failures, comes back as a typed variant (§4.I).
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Success { provider_response: Option<Value> },
    RetryableError { error_class: String, error_message: String, provider_response: Option<Value> },
    NonRetryableError { error_class: String, error_message: String, provider_response: Option<Value> },
    Timeout { error_message: String },
}

impl AttemptOutcome {
    pub fn db_outcome(&self) -> &'static str {
        match self {
            AttemptOutcome::Success { .. } => "success",
            AttemptOutcome::RetryableError { .. } => "retryable_error",
            AttemptOutcome::NonRetryableError { .. } => "non_retryable_error",
            AttemptOutcome::Timeout { .. } => "timeout",
        }
    }

    pub fn error_class(&self) -> Option<&str> {
        match self {
            AttemptOutcome::Success { .. } => None,
            AttemptOutcome::RetryableError { error_class, .. } => Some(error_class),
            AttemptOutcome::NonRetryableError { error_class, .. } => Some(error_class),
            AttemptOutcome::Timeout { .. } => Some("timeout"),
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            AttemptOutcome::Success { .. } => None,
            AttemptOutcome::RetryableError { error_message, .. } => Some(error_message),
            AttemptOutcome::NonRetryableError { error_message, .. } => Some(error_message),
            AttemptOutcome::Timeout { error_message } => Some(error_message),
        }
    }

    pub fn provider_response(&self) -> Option<Value> {
        match self {
            AttemptOutcome::Success { provider_response } => provider_response.clone(),
            AttemptOutcome::RetryableError { provider_response, .. } => provider_response.clone(),
            AttemptOutcome::NonRetryableError { provider_response, .. } => provider_response.clone(),
            AttemptOutcome::Timeout { .. } => None,
        }
    }

    /// `retryable_error` and `timeout` both advance the backoff loop;
    /// everything else is terminal for this attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AttemptOutcome::RetryableError { .. } | AttemptOutcome::Timeout { .. })
    }
}

/// One outbound channel's send primitive. `butler-testkit` ships an
/// in-memory implementation for tests, mirroring the teacher's
/// `PaperBroker` deterministic-adapter idiom.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    async fn send(
        &self,
        channel: &str,
        target_identity: &str,
        intent: &str,
        message_content: &str,
    ) -> AttemptOutcome;
}
