#![cfg(feature = "testkit")]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use butler_daemon::route_tool::RouteExecuteTool;
use butler_daemon::{AcceptingConnections, AppState};
use butler_db::route_inbox;
use butler_egress_guard::EgressOwnershipFilter;
use butler_rpc::Tool;
use butler_schemas::{RequestContext, RouteEnvelope, RouteInput};
use butler_spawner::{SdkQuery, SessionOptions, SessionOutcome, Spawner};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Echo;

#[async_trait]
impl SdkQuery for Echo {
    async fn query(&self, prompt: &str, _options: &SessionOptions, _cancel: CancellationToken) -> SessionOutcome {
        SessionOutcome::ok(serde_json::json!({ "echo": prompt }))
    }
}

fn envelope(prompt: &str) -> RouteEnvelope {
    RouteEnvelope::new(
        RequestContext {
            request_id: Uuid::new_v4(),
            received_at: Utc::now(),
            source_channel: "telegram".to_string(),
            source_endpoint_identity: "bot123".to_string(),
            source_sender_identity: "user123".to_string(),
        },
        RouteInput { prompt: prompt.to_string(), context: None },
    )
}

async fn health_state() -> Arc<AppState<Echo>> {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    Arc::new(AppState {
        pool: pool.clone(),
        spawner: Arc::new(Spawner::new(Arc::new(Echo), Some(pool))),
        egress_filter: Arc::new(EgressOwnershipFilter::new("health")),
        accepting: Arc::new(AcceptingConnections::new()),
        rate_limiter: None,
        delivery_provider: None,
        delivery_config: butler_delivery::DeliveryConfig::default(),
        ingest_buffer: None,
    })
}

#[tokio::test]
async fn accept_persists_a_row_and_returns_immediately() {
    let state = health_state().await;
    let tool = RouteExecuteTool::new(state.clone());

    let args = serde_json::to_value(envelope("remember to water the plants")).unwrap();
    let response = tool.call(args).await.unwrap();

    assert_eq!(response["status"], "accepted");
    let inbox_id: Uuid = serde_json::from_value(response["inbox_id"].clone()).unwrap();

    let row = route_inbox::fetch(&state.pool, inbox_id).await.unwrap().unwrap();
    assert_eq!(row.lifecycle_state, route_inbox::RouteInboxLifecycle::Accepted);
}

#[tokio::test]
async fn background_process_phase_marks_the_row_processed() {
    let state = health_state().await;
    let tool = RouteExecuteTool::new(state.clone());

    let args = serde_json::to_value(envelope("ping")).unwrap();
    let response = tool.call(args).await.unwrap();
    let inbox_id: Uuid = serde_json::from_value(response["inbox_id"].clone()).unwrap();

    for _ in 0..50 {
        let row = route_inbox::fetch(&state.pool, inbox_id).await.unwrap().unwrap();
        if row.lifecycle_state == route_inbox::RouteInboxLifecycle::Processed {
            assert_eq!(row.session_id.is_some(), true);
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("route_inbox row never reached processed within the test deadline");
}
