#![cfg(feature = "testkit")]

use butler_scheduler::{crud::schedule_create, crud::CreateScheduleArgs, tick};
use chrono::{Duration, Utc};

#[tokio::test]
async fn tick_dispatches_and_advances_next_run_at() {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    let name = format!("tick-{}", uuid::Uuid::new_v4());

    let created = schedule_create(
        &pool,
        CreateScheduleArgs {
            name: name.clone(),
            cron_expr: "0 0 9 * * *".to_string(),
            prompt: Some("ping".to_string()),
            job_name: None,
            job_args_json: None,
            timezone: None,
            start_at: None,
            end_at: None,
            until_at: None,
        },
    )
    .await
    .unwrap();

    // force it due immediately
    butler_db::schedule::set_enabled(&pool, created.id, true, Some(Utc::now() - Duration::seconds(1)))
        .await
        .unwrap();

    let mut dispatched = 0;
    let successes = tick(&pool, |_req| {
        dispatched += 1;
        Box::pin(async { Ok(serde_json::json!({"ok": true})) })
    })
    .await
    .unwrap();

    assert_eq!(dispatched, 1);
    assert_eq!(successes, 1);

    let row = butler_db::schedule::fetch(&pool, created.id).await.unwrap().unwrap();
    assert!(row.last_run_at.is_some());
    assert!(row.next_run_at.unwrap() > Utc::now());
}

#[tokio::test]
async fn failed_dispatch_does_not_count_as_success_but_still_advances() {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    let name = format!("tick-fail-{}", uuid::Uuid::new_v4());

    let created = schedule_create(
        &pool,
        CreateScheduleArgs {
            name,
            cron_expr: "0 0 9 * * *".to_string(),
            prompt: Some("ping".to_string()),
            job_name: None,
            job_args_json: None,
            timezone: None,
            start_at: None,
            end_at: None,
            until_at: None,
        },
    )
    .await
    .unwrap();
    butler_db::schedule::set_enabled(&pool, created.id, true, Some(Utc::now() - Duration::seconds(1)))
        .await
        .unwrap();

    let successes = tick(&pool, |_req| Box::pin(async { Err("boom".to_string()) })).await.unwrap();
    assert_eq!(successes, 0);

    let row = butler_db::schedule::fetch(&pool, created.id).await.unwrap().unwrap();
    assert_eq!(row.last_result_json, Some(serde_json::json!({"error": "boom"})));
    assert!(row.next_run_at.is_some());
}
