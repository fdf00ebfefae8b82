use warden_core::{now_unix, BreakerConfig, FailureReason, TaskStatus, TaskType};
use warden_store::WardenStore;

async fn open_tmp() -> (WardenStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("warden.db");
    let store = WardenStore::open(&db_path).await.expect("open store");
    (store, dir)
}

#[tokio::test]
async fn save_is_idempotent_p8() {
    let (store, _dir) = open_tmp().await;
    let hash = "a".repeat(40);

    assert!(store.save(&hash, TaskType::Added).await.unwrap());
    assert!(!store.save(&hash, TaskType::Added).await.unwrap());
    assert!(store.exists(&hash, TaskType::Added).await.unwrap());
}

#[tokio::test]
async fn claim_pending_returns_only_eligible_rows_and_flips_status() {
    let (store, _dir) = open_tmp().await;
    let hash = "b".repeat(40);
    store.save(&hash, TaskType::Completed).await.unwrap();

    let claimed = store.claim_pending(10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].status, TaskStatus::Processing);

    // A second claim must not return the same row again (P1/P6).
    let claimed_again = store.claim_pending(10).await.unwrap();
    assert!(claimed_again.is_empty());
}

#[tokio::test]
async fn claim_pending_skips_future_retries() {
    let (store, _dir) = open_tmp().await;
    let hash = "c".repeat(40);
    store.save(&hash, TaskType::Added).await.unwrap();
    store
        .schedule_retry(
            &hash,
            TaskType::Added,
            now_unix() + 3600,
            &FailureReason::NetworkError,
        )
        .await
        .unwrap();

    let claimed = store.claim_pending(10).await.unwrap();
    assert!(claimed.is_empty());
}

#[tokio::test]
async fn claim_pending_returns_the_current_retry_count() {
    let (store, _dir) = open_tmp().await;
    let hash = "ab".repeat(20);
    store.save(&hash, TaskType::Added).await.unwrap();
    store.claim_pending(10).await.unwrap();
    store
        .schedule_retry(&hash, TaskType::Added, now_unix() - 1, &FailureReason::QbitApiError)
        .await
        .unwrap();

    let claimed = store.claim_pending(10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].retry_count, 1);
    assert_eq!(
        claimed[0].failure_reason.as_deref(),
        Some("qbit_api_error")
    );
}

#[tokio::test]
async fn complete_deletes_row_terminal_success() {
    let (store, _dir) = open_tmp().await;
    let hash = "d".repeat(40);
    store.save(&hash, TaskType::Added).await.unwrap();
    store.claim_pending(10).await.unwrap();

    assert!(store.complete(&hash, TaskType::Added).await.unwrap());
    assert!(!store.exists(&hash, TaskType::Added).await.unwrap());
}

#[tokio::test]
async fn schedule_retry_sets_failed_status_and_increments_retry_count() {
    let (store, _dir) = open_tmp().await;
    let hash = "e".repeat(40);
    store.save(&hash, TaskType::Completed).await.unwrap();
    store.claim_pending(10).await.unwrap();

    store
        .schedule_retry(
            &hash,
            TaskType::Completed,
            now_unix() + 60,
            &FailureReason::QbitApiError,
        )
        .await
        .unwrap();

    let task = store.get(&hash, TaskType::Completed).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.failure_reason.as_deref(), Some("qbit_api_error"));
}

#[tokio::test]
async fn reset_stuck_reaps_old_processing_rows_back_to_pending() {
    let (store, _dir) = open_tmp().await;
    let hash = "f".repeat(40);
    store.save(&hash, TaskType::Added).await.unwrap();
    store.claim_pending(10).await.unwrap();

    // Force the row to look old by rewriting updated_time directly.
    sqlx::query("UPDATE tasks SET updated_time = 0 WHERE torrent_hash = ?1")
        .bind(&hash)
        .execute(store.pool())
        .await
        .unwrap();

    let reset = store.reset_stuck(1_800).await.unwrap();
    assert_eq!(reset, 1);

    let task = store.get(&hash, TaskType::Added).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
}

#[tokio::test]
async fn cleanup_orphans_removes_tasks_for_vanished_torrents_only() {
    let (store, _dir) = open_tmp().await;
    let gone = "1".repeat(40);
    let present = "2".repeat(40);
    store.save(&gone, TaskType::Added).await.unwrap();
    store.save(&present, TaskType::Added).await.unwrap();

    sqlx::query("UPDATE tasks SET created_time = 0")
        .execute(store.pool())
        .await
        .unwrap();

    let removed = store
        .cleanup_orphans(60, |hash| {
            let present = present.clone();
            async move { hash == present }
        })
        .await
        .unwrap();

    assert_eq!(removed, 1);
    assert!(!store.exists(&gone, TaskType::Added).await.unwrap());
    assert!(store.exists(&present, TaskType::Added).await.unwrap());
}

#[tokio::test]
async fn stats_reports_total_and_status_breakdown() {
    let (store, _dir) = open_tmp().await;
    store.save(&"3".repeat(40), TaskType::Added).await.unwrap();
    store.save(&"4".repeat(40), TaskType::Completed).await.unwrap();
    store.claim_pending(1).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(*stats.by_status.get("pending").unwrap(), 1);
    assert_eq!(*stats.by_status.get("processing").unwrap(), 1);
}

#[tokio::test]
async fn breaker_round_trips_through_storage() {
    let (store, _dir) = open_tmp().await;
    store
        .init_breaker("qbit_api", BreakerConfig::qbit_api())
        .await
        .unwrap();

    let mut status = store.load_breaker("qbit_api").await.unwrap().unwrap();
    assert_eq!(status.state, warden_core::BreakerState::Closed);

    status.failure_count = 2;
    status.state = warden_core::BreakerState::Open;
    store.save_breaker(&status).await.unwrap();

    let reloaded = store.load_breaker("qbit_api").await.unwrap().unwrap();
    assert_eq!(reloaded.failure_count, 2);
    assert_eq!(reloaded.state, warden_core::BreakerState::Open);
}
