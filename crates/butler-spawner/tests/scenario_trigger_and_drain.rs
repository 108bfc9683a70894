use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use butler_spawner::{SdkQuery, SessionOptions, SessionOutcome, Spawner};
use tokio_util::sync::CancellationToken;

struct Immediate;

#[async_trait]
impl SdkQuery for Immediate {
    async fn query(&self, prompt: &str, _options: &SessionOptions, _cancel: CancellationToken) -> SessionOutcome {
        SessionOutcome::ok(serde_json::json!({"echo": prompt}))
    }
}

struct Slow(Duration);

#[async_trait]
impl SdkQuery for Slow {
    async fn query(&self, _prompt: &str, _options: &SessionOptions, cancel: CancellationToken) -> SessionOutcome {
        tokio::select! {
            _ = tokio::time::sleep(self.0) => SessionOutcome::ok(serde_json::json!({})),
            _ = cancel.cancelled() => SessionOutcome::cancelled(),
        }
    }
}

#[tokio::test]
async fn trigger_returns_session_result() {
    let spawner = Spawner::new(Arc::new(Immediate), None);
    let result = spawner
        .trigger("hello".to_string(), SessionOptions { trigger_source: "route".to_string(), ..Default::default() })
        .await;
    assert!(result.success);
    assert_eq!(result.output, Some(serde_json::json!({"echo": "hello"})));
}

#[tokio::test]
async fn stop_accepting_rejects_subsequent_triggers() {
    let spawner = Spawner::new(Arc::new(Immediate), None);
    spawner.stop_accepting();
    let result = spawner.trigger("hi".to_string(), SessionOptions::default()).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("not accepting new triggers"));
}

#[tokio::test]
async fn drain_cancels_stragglers_after_timeout() {
    let spawner = Arc::new(Spawner::new(Arc::new(Slow(Duration::from_secs(30))), None));
    let spawner2 = spawner.clone();
    let handle = tokio::spawn(async move {
        spawner2.trigger("slow".to_string(), SessionOptions::default()).await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(spawner.in_flight_count(), 1);

    spawner.drain(Duration::from_millis(50)).await;
    assert_eq!(spawner.in_flight_count(), 0);

    let result = handle.await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("cancelled"));
}
