use std::sync::Arc;

use async_trait::async_trait;

use cronq_errors::{SchedulerError, SchedulerResult};

use crate::entities::Task;

/// 异步移交配置
#[derive(Debug, Clone, Copy)]
pub struct HandoffConfig {
    /// 单任务执行超过该时长后移交给异步跟踪路径（毫秒）
    pub timeout_ms: u64,
}

/// 执行器形态
///
/// 用标签枚举表达三种调用方式；移交配置只存在于串行形态上，
/// 批量与移交的非法组合因此无法表达。
#[derive(Debug, Clone, Copy)]
pub enum ExecutorKind {
    /// 同类型任务合并为一次调用，组内原子性由执行器自行保证
    Batch,
    /// 按 chunk_size 分块做有界并发，块内无顺序保证
    Parallel { chunk_size: usize },
    /// 严格按列表顺序逐个执行
    Sequential { handoff: Option<HandoffConfig> },
}

/// 任务结果写入面
///
/// 执行器通过它登记执行结果；每个任务在一次运行内恰好落入
/// 一个结果桶。并发执行时调度器会为每个任务派生隔离的写入面。
pub trait TaskContext: Send + Sync {
    fn success(&self, task: Task);
    fn fail(&self, task: Task);
    /// 登记一个由本次执行派生的待调度新任务
    fn schedule_new(&self, task: Task);
}

/// 任务执行器
///
/// 按 `(queue_id, task_type)` 在注册表中查找；形态由 [`ExecutorKind`]
/// 决定调度器的派发方式。执行器必须在返回前为每个任务调用
/// `success` 或 `fail`，抛错前也不例外。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ExecutorKind;

    /// 任务没有持久化 id 时，入队重试前是否必须先分配一个
    fn store_on_failure(&self) -> bool {
        false
    }

    /// 单任务执行入口，Parallel 与 Sequential 形态使用
    async fn execute(&self, task: &Task, ctx: &dyn TaskContext) -> SchedulerResult<()> {
        let _ = (task, ctx);
        Err(SchedulerError::task_execution_error(format!(
            "执行器 {} 不支持单任务调用",
            self.name()
        )))
    }

    /// 整组执行入口，Batch 形态使用
    async fn execute_batch(&self, tasks: &[Task], ctx: &dyn TaskContext) -> SchedulerResult<()> {
        let _ = (tasks, ctx);
        Err(SchedulerError::task_execution_error(format!(
            "执行器 {} 不支持批量调用",
            self.name()
        )))
    }
}

/// 执行器注册表抽象
///
/// 作为显式依赖注入调度器构造函数，不提供模块级单例，
/// 多个调度器实例可以在测试中并存。
#[async_trait]
pub trait ExecutorRegistry: Send + Sync {
    async fn register(
        &self,
        queue_id: &str,
        task_type: &str,
        executor: Arc<dyn TaskExecutor>,
    ) -> SchedulerResult<()>;

    async fn get(&self, queue_id: &str, task_type: &str) -> Option<Arc<dyn TaskExecutor>>;

    async fn unregister(&self, queue_id: &str, task_type: &str) -> SchedulerResult<bool>;

    async fn contains(&self, queue_id: &str, task_type: &str) -> bool;

    async fn count(&self) -> usize;

    async fn clear(&self);
}
