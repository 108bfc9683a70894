#![cfg(feature = "testkit")]

use butler_db::route_inbox;

#[tokio::test]
async fn repeated_idempotency_key_is_a_no_op() {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    let key = format!("idem-{}", uuid::Uuid::new_v4());
    let event_key = format!("evt-{}", uuid::Uuid::new_v4());

    let (first, fresh) = route_inbox::insert_accepted_deduped(
        &pool,
        serde_json::json!({"payload": {"normalized_text": "hi"}}),
        &key,
        &event_key,
    )
    .await
    .unwrap();
    assert!(fresh);

    let (second, fresh_again) = route_inbox::insert_accepted_deduped(
        &pool,
        serde_json::json!({"payload": {"normalized_text": "hi"}}),
        &key,
        &format!("evt-{}", uuid::Uuid::new_v4()),
    )
    .await
    .unwrap();
    assert!(!fresh_again);
    assert_eq!(first, second);
}

#[tokio::test]
async fn repeated_source_event_pair_is_a_no_op_even_with_a_new_idempotency_key() {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    let event_key = format!("evt-{}", uuid::Uuid::new_v4());

    let (first, fresh) = route_inbox::insert_accepted_deduped(
        &pool,
        serde_json::json!({"payload": {"normalized_text": "hi"}}),
        &format!("idem-{}", uuid::Uuid::new_v4()),
        &event_key,
    )
    .await
    .unwrap();
    assert!(fresh);

    let (second, fresh_again) = route_inbox::insert_accepted_deduped(
        &pool,
        serde_json::json!({"payload": {"normalized_text": "hi"}}),
        &format!("idem-{}", uuid::Uuid::new_v4()),
        &event_key,
    )
    .await
    .unwrap();
    assert!(!fresh_again);
    assert_eq!(first, second);
}

#[tokio::test]
async fn distinct_keys_insert_distinct_rows() {
    let pool = butler_db::testkit_db_pool().await.unwrap();

    let (first, _) = route_inbox::insert_accepted_deduped(
        &pool,
        serde_json::json!({"payload": {"normalized_text": "a"}}),
        &format!("idem-{}", uuid::Uuid::new_v4()),
        &format!("evt-{}", uuid::Uuid::new_v4()),
    )
    .await
    .unwrap();

    let (second, fresh) = route_inbox::insert_accepted_deduped(
        &pool,
        serde_json::json!({"payload": {"normalized_text": "b"}}),
        &format!("idem-{}", uuid::Uuid::new_v4()),
        &format!("evt-{}", uuid::Uuid::new_v4()),
    )
    .await
    .unwrap();
    assert!(fresh);
    assert_ne!(first, second);
}
