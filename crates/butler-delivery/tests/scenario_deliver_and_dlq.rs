#![cfg(feature = "testkit")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use butler_db::delivery::{self, NewDeliveryRequest};
use butler_delivery::{deliver, AttemptOutcome, ChannelProvider, DeliveryConfig, DeliveryOutcomeSummary};

struct AlwaysSucceeds;

#[async_trait]
impl ChannelProvider for AlwaysSucceeds {
    async fn send(&self, _channel: &str, _target: &str, _intent: &str, _body: &str) -> AttemptOutcome {
        AttemptOutcome::Success { provider_response: None }
    }
}

struct FailsThenSucceeds {
    calls: AtomicUsize,
    fail_count: usize,
}

#[async_trait]
impl ChannelProvider for FailsThenSucceeds {
    async fn send(&self, _channel: &str, _target: &str, _intent: &str, _body: &str) -> AttemptOutcome {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_count {
            AttemptOutcome::RetryableError {
                error_class: "provider_unavailable".to_string(),
                error_message: "503".to_string(),
                provider_response: None,
            }
        } else {
            AttemptOutcome::Success { provider_response: None }
        }
    }
}

struct AlwaysRejects;

#[async_trait]
impl ChannelProvider for AlwaysRejects {
    async fn send(&self, _channel: &str, _target: &str, _intent: &str, _body: &str) -> AttemptOutcome {
        AttemptOutcome::NonRetryableError {
            error_class: "invalid_recipient".to_string(),
            error_message: "no such user".to_string(),
            provider_response: None,
        }
    }
}

fn fast_config(retry_budget: u32) -> DeliveryConfig {
    DeliveryConfig { retry_budget, backoff_base_ms: 1, backoff_multiplier: 1.0, backoff_max_ms: 5 }
}

#[tokio::test]
async fn first_success_marks_delivered() {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    let (req, _) = delivery::enqueue(
        &pool,
        NewDeliveryRequest {
            idempotency_key: uuid::Uuid::new_v4().to_string(),
            origin_butler: "finance".to_string(),
            channel: "telegram".to_string(),
            intent: "send".to_string(),
            target_identity: "user1".to_string(),
            message_content: "hi".to_string(),
        },
    )
    .await
    .unwrap();

    let provider: Arc<dyn ChannelProvider> = Arc::new(AlwaysSucceeds);
    let outcome = deliver(&pool, &provider, &fast_config(3), &req).await.unwrap();
    assert_eq!(outcome, DeliveryOutcomeSummary::Delivered);
}

#[tokio::test]
async fn retryable_failures_recover_within_budget() {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    let (req, _) = delivery::enqueue(
        &pool,
        NewDeliveryRequest {
            idempotency_key: uuid::Uuid::new_v4().to_string(),
            origin_butler: "finance".to_string(),
            channel: "telegram".to_string(),
            intent: "send".to_string(),
            target_identity: "user1".to_string(),
            message_content: "hi".to_string(),
        },
    )
    .await
    .unwrap();

    let provider: Arc<dyn ChannelProvider> =
        Arc::new(FailsThenSucceeds { calls: AtomicUsize::new(0), fail_count: 2 });
    let outcome = deliver(&pool, &provider, &fast_config(5), &req).await.unwrap();
    assert_eq!(outcome, DeliveryOutcomeSummary::Delivered);

    let attempts = delivery::list_attempts(&pool, req.id).await.unwrap();
    assert_eq!(attempts.len(), 3);
}

#[tokio::test]
async fn non_retryable_error_dead_letters_immediately() {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    let (req, _) = delivery::enqueue(
        &pool,
        NewDeliveryRequest {
            idempotency_key: uuid::Uuid::new_v4().to_string(),
            origin_butler: "finance".to_string(),
            channel: "telegram".to_string(),
            intent: "send".to_string(),
            target_identity: "user1".to_string(),
            message_content: "hi".to_string(),
        },
    )
    .await
    .unwrap();

    let provider: Arc<dyn ChannelProvider> = Arc::new(AlwaysRejects);
    let outcome = deliver(&pool, &provider, &fast_config(5), &req).await.unwrap();
    assert_eq!(outcome, DeliveryOutcomeSummary::DeadLettered);

    let attempts = delivery::list_attempts(&pool, req.id).await.unwrap();
    assert_eq!(attempts.len(), 1);
}
