#![cfg(feature = "testkit")]

use butler_audit::{verify_hash_chain, verify_hash_chain_rows, AuditWriter, VerifyResult};
use butler_db::approvals::{self};
use serde_json::json;

async fn make_action(pool: &sqlx::PgPool) -> i64 {
    approvals::create_pending_action(pool, "audit_test_tool", json!({}), None)
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn untampered_chain_verifies_valid() {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    let action_id = make_action(&pool).await;
    let writer = AuditWriter::new(pool.clone(), true);

    for i in 0..5 {
        writer
            .append(action_id, &format!("test_event_{i}"), "system:test", json!({"index": i}))
            .await
            .unwrap();
    }

    let result = verify_hash_chain(&pool).await.unwrap();
    assert!(matches!(result, VerifyResult::Valid { events } if events >= 5));
}

#[tokio::test]
async fn tampered_payload_detected() {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    let action_id = make_action(&pool).await;
    let writer = AuditWriter::new(pool.clone(), true);

    for i in 0..5 {
        writer
            .append(action_id, &format!("test_event_{i}"), "system:test", json!({"index": i}))
            .await
            .unwrap();
    }

    let mut events = approvals::list_audit_events(&pool, Some(action_id), None, 100).await.unwrap();
    assert_eq!(events.len(), 5);
    events[2].detail_json = json!({"index": "TAMPERED"});

    let result = verify_hash_chain_rows(&events).unwrap();
    match result {
        VerifyResult::Broken { position, reason } => {
            assert_eq!(position, 3, "tamper should be detected at position 3, got {position}: {reason}");
            assert!(reason.contains("hash_self mismatch"), "got: {reason}");
        }
        VerifyResult::Valid { events } => panic!("tampered chain should not verify valid (got {events} events)"),
    }
}

#[tokio::test]
async fn deleted_event_detected() {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    let action_id = make_action(&pool).await;
    let writer = AuditWriter::new(pool.clone(), true);

    for i in 0..5 {
        writer
            .append(action_id, &format!("test_event_{i}"), "system:test", json!({"index": i}))
            .await
            .unwrap();
    }

    let mut events = approvals::list_audit_events(&pool, Some(action_id), None, 100).await.unwrap();
    events.remove(2);

    let result = verify_hash_chain_rows(&events).unwrap();
    match result {
        VerifyResult::Broken { position, reason } => {
            assert!(reason.contains("hash_prev mismatch"), "got: {reason}");
            assert!(position >= 3, "break should surface at position 3 or later (was {position})");
        }
        VerifyResult::Valid { events } => panic!("chain with a deleted event should not verify valid (got {events} events)"),
    }
}

#[tokio::test]
async fn single_event_verifies() {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    let action_id = make_action(&pool).await;
    let writer = AuditWriter::new(pool.clone(), true);

    writer.append(action_id, "single", "system:test", json!({"ok": true})).await.unwrap();

    let events = approvals::list_audit_events(&pool, Some(action_id), None, 100).await.unwrap();
    let result = verify_hash_chain_rows(&events).unwrap();
    assert!(matches!(result, VerifyResult::Valid { events } if events == 1));
}

#[tokio::test]
async fn no_hash_chain_mode_leaves_hashes_unset() {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    let action_id = make_action(&pool).await;
    let writer = AuditWriter::new(pool.clone(), false);

    let event = writer.append(action_id, "no_chain", "system:test", json!({})).await.unwrap();
    assert!(event.hash_prev.is_none());
    assert!(event.hash_self.is_none());
}
