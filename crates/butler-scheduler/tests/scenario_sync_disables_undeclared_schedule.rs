#![cfg(feature = "testkit")]

use butler_config::schedule::ScheduleDecl;
use butler_db::schedule;
use butler_scheduler::sync_toml_schedules;

#[tokio::test]
async fn reappearing_schedule_is_reenabled_with_fresh_next_run_at() {
    let pool = butler_db::testkit_db_pool().await.unwrap();
    let name = format!("sched-{}", uuid::Uuid::new_v4());

    let decl = ScheduleDecl {
        name: name.clone(),
        cron: "0 0 9 * * *".to_string(),
        prompt: Some("good morning".to_string()),
        job_name: None,
        job_args: None,
        timezone: None,
        start_at: None,
        end_at: None,
        until_at: None,
    };

    sync_toml_schedules(&pool, &[decl.clone()]).await.unwrap();
    let row = schedule::fetch_by_name(&pool, &name).await.unwrap().unwrap();
    assert!(row.enabled);
    assert!(row.next_run_at.is_some());

    sync_toml_schedules(&pool, &[]).await.unwrap();
    let row = schedule::fetch_by_name(&pool, &name).await.unwrap().unwrap();
    assert!(!row.enabled);
    assert!(row.next_run_at.is_none());

    sync_toml_schedules(&pool, &[decl]).await.unwrap();
    let row = schedule::fetch_by_name(&pool, &name).await.unwrap().unwrap();
    assert!(row.enabled);
    assert!(row.next_run_at.is_some());
}
