//! 协作者端口
//!
//! 任务存储、锁缓存与异步准入控制器都通过这里的窄接口被核心消费，
//! 持久化格式与事务语义完全属于各自的实现方。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cronq_errors::SchedulerResult;

use crate::entities::{Task, TaskStatus};

/// 任务存储抽象
///
/// 存储自身不做乐观/悲观锁，任务级互斥完全依赖锁层。
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 拉取到期且处于 Scheduled 状态的任务
    async fn get_mature_tasks(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Task>>;

    /// 持久化新任务，返回已分配 id 的副本
    async fn create_tasks(&self, tasks: &[Task]) -> SchedulerResult<Vec<Task>>;

    async fn mark_tasks_as_processing(&self, ids: &[i64]) -> SchedulerResult<()>;

    async fn mark_tasks_as_executed(&self, tasks: &[Task]) -> SchedulerResult<()>;

    /// 标记失败
    ///
    /// 带有 `retry_after_seconds` 提示的任务由存储按提示重新入队
    /// （Scheduled + 新的到期时间 + retries 加一），其余落入终态 Failed。
    async fn mark_tasks_as_failed(&self, tasks: &[Task]) -> SchedulerResult<()>;

    async fn mark_tasks_as_ignored(&self, tasks: &[Task]) -> SchedulerResult<()>;

    /// 批量改写任务字段，返回命中的任务数
    ///
    /// 容量回压重排等不走消息队列的路径使用。
    async fn update_tasks(&self, updates: &[TaskUpdate]) -> SchedulerResult<u64>;

    async fn get_cleanup_stats(&self) -> SchedulerResult<CleanupStats>;

    /// 清理孤儿 processing 任务与过期任务
    ///
    /// 孤儿任务重置为 Scheduled 并使 retries 加一（隐式重试），
    /// 过期任务直接移除。
    async fn cleanup_tasks(
        &self,
        orphaned_before: DateTime<Utc>,
        expired_before: DateTime<Utc>,
    ) -> SchedulerResult<CleanupReport>;

    /// 生成一个持久化任务 id
    async fn generate_id(&self) -> SchedulerResult<i64>;
}

/// 批量更新的单条描述，None 字段保持原值
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub id: i64,
    pub execute_at: Option<DateTime<Utc>>,
    pub status: Option<TaskStatus>,
    pub retries: Option<i32>,
}

/// 清理前的存量统计，仅用于观测
#[derive(Debug, Clone, Default)]
pub struct CleanupStats {
    pub scheduled: usize,
    pub processing: usize,
    pub orphaned_processing: usize,
    pub expired: usize,
}

/// 一次清理的结果
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub requeued: usize,
    pub removed: usize,
}

/// 锁缓存抽象
///
/// 任何提供原子 set-if-absent + TTL 的 KV 存储都可以作为后端。
#[async_trait]
pub trait LockCache: Send + Sync {
    /// 键不存在时写入并设置 TTL，返回是否写入成功
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> SchedulerResult<bool>;

    /// 刷新已有键的 TTL，键不存在时返回 false
    async fn expire(&self, key: &str, ttl: Duration) -> SchedulerResult<bool>;

    async fn delete(&self, key: &str) -> SchedulerResult<()>;

    async fn exists(&self, key: &str) -> SchedulerResult<bool>;
}

/// 异步移交的准入控制器
///
/// 纯准入门：在途异步任务满载时，调度器把整组任务延后而不是失败。
#[async_trait]
pub trait AsyncTaskManager: Send + Sync {
    async fn can_accept_task(&self) -> bool;
}
