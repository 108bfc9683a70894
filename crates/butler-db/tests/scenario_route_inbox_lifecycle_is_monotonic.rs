#![cfg(feature = "testkit")]

use butler_db::{route_inbox, RouteInboxLifecycle};

#[tokio::test]
async fn accepted_to_processing_to_processed() {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    let id = route_inbox::insert_accepted(&pool, serde_json::json!({"prompt": "hi"}))
        .await
        .unwrap();

    let row = route_inbox::fetch(&pool, id).await.unwrap().unwrap();
    assert_eq!(row.lifecycle_state, RouteInboxLifecycle::Accepted);

    let claimed = route_inbox::mark_processing(&pool, id).await.unwrap();
    assert!(claimed);

    let double_claim = route_inbox::mark_processing(&pool, id).await.unwrap();
    assert!(!double_claim, "a row already processing must not be claimable again");

    route_inbox::mark_processed(&pool, id, "session-123").await.unwrap();
    let row = route_inbox::fetch(&pool, id).await.unwrap().unwrap();
    assert_eq!(row.lifecycle_state, RouteInboxLifecycle::Processed);
    assert_eq!(row.session_id.as_deref(), Some("session-123"));
}

#[tokio::test]
async fn stale_accepted_rows_are_recoverable() {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    let id = route_inbox::insert_accepted(&pool, serde_json::json!({"prompt": "recover me"}))
        .await
        .unwrap();

    let recovered = route_inbox::list_all_accepted(&pool).await.unwrap();
    assert!(recovered.iter().any(|r| r.id == id));
}
