#![cfg(feature = "testkit")]

use std::sync::Arc;

use async_trait::async_trait;
use butler_daemon::route_tool::RouteExecuteTool;
use butler_daemon::{AcceptingConnections, AppState};
use butler_delivery::{AttemptOutcome, ChannelProvider};
use butler_egress_guard::EgressOwnershipFilter;
use butler_ratelimit::{RateLimiter, RateLimiterConfig};
use butler_rpc::Tool;
use butler_schemas::{NotifyDelivery, NotifyEnvelope, NotifyIntent, RequestContext, RouteEnvelope, RouteInput};
use butler_spawner::{SdkQuery, SessionOptions, SessionOutcome, Spawner};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Unused;

#[async_trait]
impl SdkQuery for Unused {
    async fn query(&self, _prompt: &str, _options: &SessionOptions, _cancel: CancellationToken) -> SessionOutcome {
        SessionOutcome::failed("messenger path never reaches the spawner for notify_request")
    }
}

struct AlwaysDelivers;

#[async_trait]
impl ChannelProvider for AlwaysDelivers {
    async fn send(&self, _channel: &str, _target_identity: &str, _intent: &str, _message_content: &str) -> AttemptOutcome {
        AttemptOutcome::Success { provider_response: None }
    }
}

fn route_with_notify(notify: NotifyEnvelope) -> RouteEnvelope {
    RouteEnvelope::new(
        RequestContext {
            request_id: Uuid::new_v4(),
            received_at: Utc::now(),
            source_channel: "internal".to_string(),
            source_endpoint_identity: "health".to_string(),
            source_sender_identity: "health".to_string(),
        },
        RouteInput {
            prompt: String::new(),
            context: Some(serde_json::json!({ "notify_request": notify })),
        },
    )
}

fn permissive_limiter() -> RateLimiter {
    RateLimiter::new(RateLimiterConfig {
        global_max_per_minute: 1000.0,
        global_max_in_flight: 100,
        per_recipient_max_per_minute: 1000.0,
        reply_priority_multiplier: 1.0,
        channel_limits: Default::default(),
    })
}

async fn messenger_state() -> Arc<AppState<Unused>> {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    Arc::new(AppState {
        pool: pool.clone(),
        spawner: Arc::new(Spawner::new(Arc::new(Unused), Some(pool))),
        egress_filter: Arc::new(EgressOwnershipFilter::new("messenger")),
        accepting: Arc::new(AcceptingConnections::new()),
        rate_limiter: Some(Arc::new(permissive_limiter())),
        delivery_provider: Some(Arc::new(AlwaysDelivers)),
        delivery_config: butler_delivery::DeliveryConfig::default(),
        ingest_buffer: None,
    })
}

#[tokio::test]
async fn notify_request_delivers_synchronously_and_never_touches_route_inbox() {
    let state = messenger_state().await;
    let tool = RouteExecuteTool::new(state.clone());

    let notify = NotifyEnvelope::new(
        "health",
        NotifyDelivery {
            intent: NotifyIntent::Send,
            channel: "telegram".to_string(),
            message: "take your meds".to_string(),
            recipient: "user123".to_string(),
            subject: None,
        },
    );

    let args = serde_json::to_value(route_with_notify(notify)).unwrap();
    let response = tool.call(args).await.unwrap();

    assert_eq!(response["status"], "delivered");
    assert!(response.get("delivery_request_id").is_some());

    let all_accepted = butler_db::route_inbox::list_all_accepted(&state.pool).await.unwrap();
    assert!(all_accepted.is_empty(), "synchronous notify delivery must not create a route_inbox row");
}

#[tokio::test]
async fn repeated_identical_notify_reuses_the_same_delivery_request() {
    let state = messenger_state().await;
    let tool = RouteExecuteTool::new(state.clone());

    let notify = || {
        NotifyEnvelope::new(
            "health",
            NotifyDelivery {
                intent: NotifyIntent::Send,
                channel: "telegram".to_string(),
                message: "same message twice".to_string(),
                recipient: "user123".to_string(),
                subject: None,
            },
        )
    };

    let first = tool.call(serde_json::to_value(route_with_notify(notify())).unwrap()).await.unwrap();
    let second = tool.call(serde_json::to_value(route_with_notify(notify())).unwrap()).await.unwrap();

    assert_eq!(first["delivery_request_id"], second["delivery_request_id"]);
}
