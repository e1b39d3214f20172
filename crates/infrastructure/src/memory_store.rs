use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::debug;

use cronq_domain::{
    CleanupReport, CleanupStats, Task, TaskStatus, TaskStore, TaskUpdate,
};
use cronq_errors::SchedulerResult;

/// 统计孤儿 processing 任务时使用的陈旧窗口
const ORPHAN_STATS_WINDOW_HOURS: i64 = 48;

/// 内存任务存储
///
/// 嵌入式部署与演示用的 [`TaskStore`] 实现；生产部署应替换为
/// 持久化适配器。状态语义与端口契约保持一致：失败时按
/// `retry_after_seconds` 提示重新入队，清理时重置孤儿任务。
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<i64, Task>>,
    next_id: AtomicI64,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<i64, Task>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 当前存量，测试与观测用
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// 按 id 读取任务副本
    pub fn get(&self, id: i64) -> Option<Task> {
        self.guard().get(&id).cloned()
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get_mature_tasks(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Task>> {
        let tasks = self.guard();
        let mut mature: Vec<Task> = tasks
            .values()
            .filter(|task| task.is_mature(now))
            .cloned()
            .collect();
        mature.sort_by_key(|task| task.execute_at);
        Ok(mature)
    }

    async fn create_tasks(&self, tasks: &[Task]) -> SchedulerResult<Vec<Task>> {
        let mut stored = self.guard();
        let mut created = Vec::with_capacity(tasks.len());
        for task in tasks {
            let mut task = task.clone();
            let id = match task.id {
                Some(id) => id,
                None => self.next_id.fetch_add(1, Ordering::SeqCst),
            };
            task.id = Some(id);
            task.status = TaskStatus::Scheduled;
            task.updated_at = Utc::now();
            stored.insert(id, task.clone());
            created.push(task);
        }
        Ok(created)
    }

    async fn mark_tasks_as_processing(&self, ids: &[i64]) -> SchedulerResult<()> {
        let now = Utc::now();
        let mut tasks = self.guard();
        for id in ids {
            if let Some(task) = tasks.get_mut(id) {
                task.status = TaskStatus::Processing;
                task.processing_started_at = Some(now);
                task.updated_at = now;
            }
        }
        Ok(())
    }

    async fn mark_tasks_as_executed(&self, executed: &[Task]) -> SchedulerResult<()> {
        let now = Utc::now();
        let mut tasks = self.guard();
        for done in executed {
            let Some(id) = done.id else { continue };
            if let Some(task) = tasks.get_mut(&id) {
                task.status = TaskStatus::Executed;
                task.processing_started_at = None;
                task.updated_at = now;
                task.execution_stats.extend(done.execution_stats.clone());
            }
        }
        Ok(())
    }

    async fn mark_tasks_as_failed(&self, failed: &[Task]) -> SchedulerResult<()> {
        let now = Utc::now();
        let mut tasks = self.guard();
        for done in failed {
            let Some(id) = done.id else { continue };
            if let Some(task) = tasks.get_mut(&id) {
                task.execution_stats.extend(done.execution_stats.clone());
                task.execution_stats
                    .insert("failed_at".to_string(), json!(now.to_rfc3339()));
                task.retries += 1;
                task.processing_started_at = None;
                task.updated_at = now;
                match done.retry_after_seconds.or(task.retry_after_seconds) {
                    // 带退避提示的失败重新入队
                    Some(seconds) => {
                        task.status = TaskStatus::Scheduled;
                        task.execute_at = now + Duration::seconds(seconds);
                        debug!("任务 {} 失败后按提示重新入队: +{}s", id, seconds);
                    }
                    None => {
                        task.status = TaskStatus::Failed;
                    }
                }
            }
        }
        Ok(())
    }

    async fn mark_tasks_as_ignored(&self, ignored: &[Task]) -> SchedulerResult<()> {
        let now = Utc::now();
        let mut tasks = self.guard();
        for done in ignored {
            let Some(id) = done.id else { continue };
            // 忽略的任务可能还未入库，原样落一条终态记录
            let mut task = tasks.get(&id).cloned().unwrap_or_else(|| done.clone());
            task.id = Some(id);
            task.status = TaskStatus::Ignored;
            task.processing_started_at = None;
            task.updated_at = now;
            task.execution_stats.extend(done.execution_stats.clone());
            tasks.insert(id, task);
        }
        Ok(())
    }

    async fn update_tasks(&self, updates: &[TaskUpdate]) -> SchedulerResult<u64> {
        let now = Utc::now();
        let mut tasks = self.guard();
        let mut matched = 0;
        for update in updates {
            if let Some(task) = tasks.get_mut(&update.id) {
                if let Some(execute_at) = update.execute_at {
                    task.execute_at = execute_at;
                }
                if let Some(status) = update.status {
                    task.status = status;
                    if !matches!(status, TaskStatus::Processing) {
                        task.processing_started_at = None;
                    }
                }
                if let Some(retries) = update.retries {
                    task.retries = retries;
                }
                task.updated_at = now;
                matched += 1;
            }
        }
        Ok(matched)
    }

    async fn get_cleanup_stats(&self) -> SchedulerResult<CleanupStats> {
        let now = Utc::now();
        let orphan_threshold = now - Duration::hours(ORPHAN_STATS_WINDOW_HOURS);
        let tasks = self.guard();
        let mut stats = CleanupStats::default();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Scheduled => stats.scheduled += 1,
                TaskStatus::Processing => {
                    stats.processing += 1;
                    if task
                        .processing_started_at
                        .map(|started| started < orphan_threshold)
                        .unwrap_or(false)
                    {
                        stats.orphaned_processing += 1;
                    }
                }
                _ => {}
            }
            if task.expires_at.map(|at| at < now).unwrap_or(false) {
                stats.expired += 1;
            }
        }
        Ok(stats)
    }

    async fn cleanup_tasks(
        &self,
        orphaned_before: DateTime<Utc>,
        expired_before: DateTime<Utc>,
    ) -> SchedulerResult<CleanupReport> {
        let now = Utc::now();
        let mut tasks = self.guard();
        let mut report = CleanupReport::default();

        let expired_ids: Vec<i64> = tasks
            .values()
            .filter(|task| {
                task.expires_at
                    .map(|at| at < expired_before)
                    .unwrap_or(false)
            })
            .filter_map(|task| task.id)
            .collect();
        for id in expired_ids {
            tasks.remove(&id);
            report.removed += 1;
        }

        for task in tasks.values_mut() {
            let orphaned = matches!(task.status, TaskStatus::Processing)
                && task
                    .processing_started_at
                    .map(|started| started < orphaned_before)
                    .unwrap_or(true);
            if orphaned {
                // 隐式重试：重置回 Scheduled 并计入一次重试
                task.status = TaskStatus::Scheduled;
                task.processing_started_at = None;
                task.retries += 1;
                task.updated_at = now;
                report.requeued += 1;
            }
        }
        Ok(report)
    }

    async fn generate_id(&self) -> SchedulerResult<i64> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduled_task(execute_at: DateTime<Utc>) -> Task {
        Task::new("default", "mail", json!({}), execute_at)
    }

    #[tokio::test]
    async fn test_mature_tasks_filtered_and_ordered() {
        let store = MemoryTaskStore::new();
        let now = Utc::now();

        let late = scheduled_task(now - Duration::seconds(10));
        let early = scheduled_task(now - Duration::seconds(60));
        let future = scheduled_task(now + Duration::minutes(5));
        store
            .create_tasks(&[late.clone(), early.clone(), future])
            .await
            .unwrap();

        let mature = store.get_mature_tasks(now).await.unwrap();
        assert_eq!(mature.len(), 2);
        // 最早到期的排在前面
        assert!(mature[0].execute_at < mature[1].execute_at);
    }

    #[tokio::test]
    async fn test_failed_with_hint_requeues() {
        let store = MemoryTaskStore::new();
        let mut task = scheduled_task(Utc::now() - Duration::seconds(1));
        task.retry_after_seconds = Some(300);
        let created = store.create_tasks(&[task]).await.unwrap();

        store.mark_tasks_as_failed(&created).await.unwrap();

        let stored = store.get(created[0].id.unwrap()).unwrap();
        assert_eq!(stored.status, TaskStatus::Scheduled);
        assert_eq!(stored.retries, 1);
        assert!(stored.execute_at > Utc::now() + Duration::seconds(200));
        assert!(stored.execution_stats.contains_key("failed_at"));
    }

    #[tokio::test]
    async fn test_failed_without_hint_is_terminal() {
        let store = MemoryTaskStore::new();
        let created = store
            .create_tasks(&[scheduled_task(Utc::now())])
            .await
            .unwrap();

        store.mark_tasks_as_failed(&created).await.unwrap();

        let stored = store.get(created[0].id.unwrap()).unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_cleanup_requeues_orphans_and_removes_expired() {
        let store = MemoryTaskStore::new();
        let now = Utc::now();

        let created = store
            .create_tasks(&[scheduled_task(now), scheduled_task(now)])
            .await
            .unwrap();
        let orphan_id = created[0].id.unwrap();
        let expired_id = created[1].id.unwrap();

        store.mark_tasks_as_processing(&[orphan_id]).await.unwrap();
        {
            let mut tasks = store.guard();
            tasks.get_mut(&orphan_id).unwrap().processing_started_at =
                Some(now - Duration::days(3));
            tasks.get_mut(&expired_id).unwrap().expires_at = Some(now - Duration::days(1));
        }

        let report = store
            .cleanup_tasks(now - Duration::days(2), now)
            .await
            .unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(report.removed, 1);

        let orphan = store.get(orphan_id).unwrap();
        assert_eq!(orphan.status, TaskStatus::Scheduled);
        assert_eq!(orphan.retries, 1);
        assert!(store.get(expired_id).is_none());
    }

    #[tokio::test]
    async fn test_update_tasks_rewrites_fields() {
        let store = MemoryTaskStore::new();
        let created = store
            .create_tasks(&[scheduled_task(Utc::now())])
            .await
            .unwrap();
        let id = created[0].id.unwrap();
        let later = Utc::now() + Duration::minutes(3);

        let matched = store
            .update_tasks(&[TaskUpdate {
                id,
                execute_at: Some(later),
                status: Some(TaskStatus::Scheduled),
                retries: None,
            }])
            .await
            .unwrap();

        assert_eq!(matched, 1);
        let stored = store.get(id).unwrap();
        assert_eq!(stored.execute_at, later);
        assert_eq!(stored.retries, 0);
    }
}
