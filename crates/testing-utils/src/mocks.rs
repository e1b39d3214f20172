//! Mock implementations of the collaborator ports
//!
//! In-memory stand-ins that record every call so tests can assert on
//! what the scheduler actually wrote, without a database, broker or
//! shared cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use cronq_domain::{
    AsyncTaskManager, CleanupReport, CleanupStats, LockCache, Message, MessageConsumer,
    MessageQueue, Task, TaskStore, TaskUpdate,
};
use cronq_errors::SchedulerResult;

fn lock_guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock implementation of TaskStore that records every write
#[derive(Clone, Default)]
pub struct MockTaskStore {
    mature: Arc<Mutex<Vec<Task>>>,
    created: Arc<Mutex<Vec<Task>>>,
    processing: Arc<Mutex<Vec<Vec<i64>>>>,
    executed: Arc<Mutex<Vec<Task>>>,
    failed: Arc<Mutex<Vec<Task>>>,
    ignored: Arc<Mutex<Vec<Task>>>,
    updates: Arc<Mutex<Vec<TaskUpdate>>>,
    next_id: Arc<AtomicI64>,
}

impl MockTaskStore {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicI64::new(1000)),
            ..Self::default()
        }
    }

    /// Seed the batch returned by `get_mature_tasks`
    pub fn with_mature_tasks(tasks: Vec<Task>) -> Self {
        let store = Self::new();
        *lock_guard(&store.mature) = tasks;
        store
    }

    pub fn executed_tasks(&self) -> Vec<Task> {
        lock_guard(&self.executed).clone()
    }

    pub fn failed_tasks(&self) -> Vec<Task> {
        lock_guard(&self.failed).clone()
    }

    pub fn ignored_tasks(&self) -> Vec<Task> {
        lock_guard(&self.ignored).clone()
    }

    pub fn created_tasks(&self) -> Vec<Task> {
        lock_guard(&self.created).clone()
    }

    pub fn processing_calls(&self) -> Vec<Vec<i64>> {
        lock_guard(&self.processing).clone()
    }

    pub fn recorded_updates(&self) -> Vec<TaskUpdate> {
        lock_guard(&self.updates).clone()
    }
}

#[async_trait]
impl TaskStore for MockTaskStore {
    async fn get_mature_tasks(&self, _now: DateTime<Utc>) -> SchedulerResult<Vec<Task>> {
        Ok(lock_guard(&self.mature).clone())
    }

    async fn create_tasks(&self, tasks: &[Task]) -> SchedulerResult<Vec<Task>> {
        let mut created = Vec::with_capacity(tasks.len());
        for task in tasks {
            let mut task = task.clone();
            if task.id.is_none() {
                task.id = Some(self.next_id.fetch_add(1, Ordering::SeqCst));
            }
            created.push(task);
        }
        lock_guard(&self.created).extend(created.clone());
        Ok(created)
    }

    async fn mark_tasks_as_processing(&self, ids: &[i64]) -> SchedulerResult<()> {
        lock_guard(&self.processing).push(ids.to_vec());
        Ok(())
    }

    async fn mark_tasks_as_executed(&self, tasks: &[Task]) -> SchedulerResult<()> {
        lock_guard(&self.executed).extend(tasks.iter().cloned());
        Ok(())
    }

    async fn mark_tasks_as_failed(&self, tasks: &[Task]) -> SchedulerResult<()> {
        lock_guard(&self.failed).extend(tasks.iter().cloned());
        Ok(())
    }

    async fn mark_tasks_as_ignored(&self, tasks: &[Task]) -> SchedulerResult<()> {
        lock_guard(&self.ignored).extend(tasks.iter().cloned());
        Ok(())
    }

    async fn update_tasks(&self, updates: &[TaskUpdate]) -> SchedulerResult<u64> {
        lock_guard(&self.updates).extend(updates.iter().cloned());
        Ok(updates.len() as u64)
    }

    async fn get_cleanup_stats(&self) -> SchedulerResult<CleanupStats> {
        Ok(CleanupStats::default())
    }

    async fn cleanup_tasks(
        &self,
        _orphaned_before: DateTime<Utc>,
        _expired_before: DateTime<Utc>,
    ) -> SchedulerResult<CleanupReport> {
        Ok(CleanupReport::default())
    }

    async fn generate_id(&self) -> SchedulerResult<i64> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

/// Mock message queue that records published messages
///
/// Deliberately lenient: no registration required, so runner tests can
/// route messages without queue setup. Contract tests for the
/// registration lifecycle live with the real implementations.
#[derive(Clone, Default)]
pub struct MockMessageQueue {
    published: Arc<Mutex<HashMap<String, Vec<Message>>>>,
    shutdown_calls: Arc<AtomicI64>,
}

impl MockMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self, queue: &str) -> Vec<Message> {
        lock_guard(&self.published)
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    pub fn published_count(&self) -> usize {
        lock_guard(&self.published).values().map(Vec::len).sum()
    }

    pub fn shutdown_calls(&self) -> i64 {
        self.shutdown_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageQueue for MockMessageQueue {
    async fn register(&self, queue: &str) -> SchedulerResult<()> {
        lock_guard(&self.published).entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn add_messages(&self, queue: &str, messages: Vec<Message>) -> SchedulerResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        lock_guard(&self.published)
            .entry(queue.to_string())
            .or_default()
            .extend(messages);
        Ok(())
    }

    async fn consume_messages_stream(
        &self,
        _queue: &str,
        _consumer: Arc<dyn MessageConsumer>,
        _cancel: watch::Receiver<bool>,
    ) -> SchedulerResult<()> {
        Ok(())
    }

    async fn consume_messages_batch(
        &self,
        queue: &str,
        consumer: Arc<dyn MessageConsumer>,
        limit: usize,
    ) -> SchedulerResult<usize> {
        let batch: Vec<Message> = {
            let mut published = lock_guard(&self.published);
            let Some(messages) = published.get_mut(queue) else {
                return Ok(0);
            };
            let count = limit.min(messages.len());
            messages.drain(..count).collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }
        let count = batch.len();
        consumer.consume(batch).await?;
        Ok(count)
    }

    async fn shutdown(&self) -> SchedulerResult<()> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Mock lock cache with TTL semantics
#[derive(Clone, Default)]
pub struct MockLockCache {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl MockLockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-hold a lock as if another instance owned it
    pub fn hold_key(&self, key: &str) {
        lock_guard(&self.entries).insert(
            key.to_string(),
            (
                "other-instance".to_string(),
                Instant::now() + Duration::from_secs(3600),
            ),
        );
    }

    pub fn live_keys(&self) -> Vec<String> {
        let now = Instant::now();
        lock_guard(&self.entries)
            .iter()
            .filter(|(_, (_, expires_at))| *expires_at > now)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[async_trait]
impl LockCache for MockLockCache {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> SchedulerResult<bool> {
        let mut entries = lock_guard(&self.entries);
        let now = Instant::now();
        if let Some((_, expires_at)) = entries.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
            entries.remove(key);
        }
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> SchedulerResult<bool> {
        let mut entries = lock_guard(&self.entries);
        let now = Instant::now();
        match entries.get_mut(key) {
            Some((_, expires_at)) if *expires_at > now => {
                *expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> SchedulerResult<()> {
        lock_guard(&self.entries).remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> SchedulerResult<bool> {
        Ok(lock_guard(&self.entries)
            .get(key)
            .map(|(_, expires_at)| *expires_at > Instant::now())
            .unwrap_or(false))
    }
}

/// Mock admission controller with a switchable gate
pub struct MockAsyncTaskManager {
    accept: AtomicBool,
}

impl MockAsyncTaskManager {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self {
            accept: AtomicBool::new(true),
        })
    }

    pub fn saturated() -> Arc<Self> {
        Arc::new(Self {
            accept: AtomicBool::new(false),
        })
    }

    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }
}

#[async_trait]
impl AsyncTaskManager for MockAsyncTaskManager {
    async fn can_accept_task(&self) -> bool {
        self.accept.load(Ordering::SeqCst)
    }
}
