use std::sync::Arc;

use chrono::{Duration, Utc};

use cronq_dispatcher::{CleanupConfig, CleanupService};
use cronq_domain::{TaskStatus, TaskStore};
use cronq_infrastructure::MemoryTaskStore;
use cronq_testing_utils::TaskBuilder;

#[tokio::test]
async fn test_run_once_requeues_stale_processing_tasks() {
    let store = Arc::new(MemoryTaskStore::new());
    let now = Utc::now();

    let created = store
        .create_tasks(&[TaskBuilder::new().without_id().build()])
        .await
        .unwrap();
    let id = created[0].id.unwrap();
    store.mark_tasks_as_processing(&[id]).await.unwrap();

    // 尚未超过陈旧窗口，不应被清理
    let service = CleanupService::new(store.clone(), CleanupConfig::default());
    let report = service.run_once().await.unwrap();
    assert_eq!(report.requeued, 0);

    // 窗口设为 0 小时后同一任务立即视为孤儿
    let service = CleanupService::new(
        store.clone(),
        CleanupConfig {
            stale_processing_hours: 0,
            ..CleanupConfig::default()
        },
    );
    let report = service.run_once().await.unwrap();
    assert_eq!(report.requeued, 1);

    let task = store.get(id).unwrap();
    assert_eq!(task.status, TaskStatus::Scheduled);
    assert_eq!(task.retries, 1);
    assert!(task.processing_started_at.is_none());
}

#[tokio::test]
async fn test_run_once_removes_expired_tasks() {
    let store = Arc::new(MemoryTaskStore::new());
    let created = store
        .create_tasks(&[TaskBuilder::new()
            .without_id()
            .with_expires_at(Utc::now() - Duration::days(1))
            .build()])
        .await
        .unwrap();
    let id = created[0].id.unwrap();

    let service = CleanupService::new(store.clone(), CleanupConfig::default());
    let report = service.run_once().await.unwrap();

    assert_eq!(report.removed, 1);
    assert!(store.get(id).is_none());
}

#[tokio::test]
async fn test_start_and_stop_lifecycle() {
    let store = Arc::new(MemoryTaskStore::new());
    let mut service = CleanupService::new(
        store,
        CleanupConfig {
            cleanup_interval_seconds: 3600,
            ..CleanupConfig::default()
        },
    );

    service.start().await.unwrap();
    service.stop().await.unwrap();
    // 重复停止是安全的
    service.stop().await.unwrap();
}
