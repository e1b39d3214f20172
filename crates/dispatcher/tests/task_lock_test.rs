use std::sync::Arc;

use cronq_dispatcher::{TaskLockConfig, TaskLockService};
use cronq_testing_utils::{MockLockCache, TaskBuilder};

fn service(cache: &MockLockCache) -> TaskLockService {
    TaskLockService::new(Arc::new(cache.clone()), TaskLockConfig::default())
}

#[tokio::test]
async fn test_acquire_is_exclusive_across_instances() {
    let cache = MockLockCache::new();
    let first = service(&cache);
    let second = service(&cache);

    assert!(first.acquire("task:1").await.unwrap());
    // 另一实例抢同一把锁失败，这不是错误
    assert!(!second.acquire("task:1").await.unwrap());

    first.release("task:1").await.unwrap();
    assert!(second.acquire("task:1").await.unwrap());
}

#[tokio::test]
async fn test_renew_only_refreshes_held_locks() {
    let cache = MockLockCache::new();
    let lock = service(&cache);

    assert!(!lock.renew("task:1").await.unwrap());
    lock.acquire("task:1").await.unwrap();
    assert!(lock.renew("task:1").await.unwrap());
}

#[tokio::test]
async fn test_filter_locked_partitions_batch() {
    let cache = MockLockCache::new();
    let lock = service(&cache);
    lock.acquire("task:1").await.unwrap();

    let tasks = vec![
        TaskBuilder::new().with_id(1).build(),
        TaskBuilder::new().with_id(2).build(),
        TaskBuilder::new().without_id().build(),
    ];
    let free = lock
        .filter_locked(tasks, |task| task.id.map(|id| format!("task:{id}")))
        .await
        .unwrap();

    // 被锁定的 1 被过滤，2 与无键任务保留
    assert_eq!(free.len(), 2);
    assert_eq!(free[0].id, Some(2));
    assert_eq!(free[1].id, None);
}

#[tokio::test]
async fn test_owner_identity_is_stable_per_instance() {
    let cache = MockLockCache::new();
    let first = service(&cache);
    let second = service(&cache);

    assert!(!first.owner().is_empty());
    assert_ne!(first.owner(), second.owner());
}
