#![cfg(feature = "testkit")]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use butler_buffer::{BufferConfig, DurableBuffer};
use butler_daemon::ingest_tool::{IngestProcessor, IngestTool};
use butler_db::route_inbox;
use butler_rpc::Tool;
use butler_spawner::{SdkQuery, SessionOptions, SessionOutcome, Spawner};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

struct Echo;

#[async_trait]
impl SdkQuery for Echo {
    async fn query(&self, prompt: &str, _options: &SessionOptions, _cancel: CancellationToken) -> SessionOutcome {
        SessionOutcome::ok(serde_json::json!({ "echo": prompt }))
    }
}

fn ingest_envelope(idempotency_key: &str, external_event_id: &str, normalized_text: &str) -> serde_json::Value {
    serde_json::json!({
        "schema_version": "ingest.v1",
        "source": {
            "channel": "email",
            "provider": "gmail",
            "endpoint_identity": "ops@example.com",
        },
        "event": {
            "external_event_id": external_event_id,
            "observed_at": Utc::now(),
            "external_thread_id": null,
        },
        "sender": { "identity": "vip@example.com" },
        "payload": {
            "raw": {},
            "normalized_text": normalized_text,
            "attachments": null,
        },
        "control": {
            "idempotency_key": idempotency_key,
            "policy_tier": null,
        },
    })
}

async fn tool_and_buffer() -> (IngestTool, Arc<DurableBuffer>, sqlx::PgPool) {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    let buffer = Arc::new(DurableBuffer::new(BufferConfig::default(), Some(pool.clone())));
    let spawner = Arc::new(Spawner::new(Arc::new(Echo), Some(pool.clone())));
    buffer.start(Arc::new(IngestProcessor::new(spawner))).await;
    let tool = IngestTool::new(pool.clone(), buffer.clone());
    (tool, buffer, pool)
}

#[tokio::test]
async fn a_fresh_envelope_is_accepted_and_not_a_duplicate() {
    let (tool, _buffer, pool) = tool_and_buffer().await;

    let response = tool.call(ingest_envelope("idem-fresh-1", "evt-fresh-1", "hello")).await.unwrap();

    assert_eq!(response["status"], "accepted");
    assert_eq!(response["duplicate"], false);

    let inbox_id: uuid::Uuid = serde_json::from_value(response["inbox_id"].clone()).unwrap();
    let row = route_inbox::fetch(&pool, inbox_id).await.unwrap().unwrap();
    assert_eq!(row.lifecycle_state, route_inbox::RouteInboxLifecycle::Accepted);
}

#[tokio::test]
async fn repeated_idempotency_key_is_reported_as_duplicate_and_stores_one_row() {
    let (tool, _buffer, _pool) = tool_and_buffer().await;

    let first = tool.call(ingest_envelope("idem-repeat-1", "evt-a", "hello")).await.unwrap();
    let second = tool.call(ingest_envelope("idem-repeat-1", "evt-b", "hello again")).await.unwrap();

    assert_eq!(first["duplicate"], false);
    assert_eq!(second["duplicate"], true);
    assert_eq!(first["inbox_id"], second["inbox_id"]);
}

#[tokio::test]
async fn repeated_source_event_pair_is_a_duplicate_even_with_a_new_idempotency_key() {
    let (tool, _buffer, _pool) = tool_and_buffer().await;

    let first = tool.call(ingest_envelope("idem-x", "evt-shared", "hello")).await.unwrap();
    let second = tool.call(ingest_envelope("idem-y", "evt-shared", "hello")).await.unwrap();

    assert_eq!(first["duplicate"], false);
    assert_eq!(second["duplicate"], true);
    assert_eq!(first["inbox_id"], second["inbox_id"]);
}

#[tokio::test]
async fn a_fresh_envelope_eventually_drains_through_the_buffer_to_processed() {
    let (tool, _buffer, pool) = tool_and_buffer().await;

    let response = tool.call(ingest_envelope("idem-drain-1", "evt-drain-1", "ping")).await.unwrap();
    let inbox_id: uuid::Uuid = serde_json::from_value(response["inbox_id"].clone()).unwrap();

    for _ in 0..50 {
        let row = route_inbox::fetch(&pool, inbox_id).await.unwrap().unwrap();
        if row.lifecycle_state == route_inbox::RouteInboxLifecycle::Processed {
            assert!(row.session_id.is_some());
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("route_inbox row never reached processed within the test deadline");
}
