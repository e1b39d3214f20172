//! 调度器核心
//!
//! 每个调度 tick 的编排：锁过滤、按执行器形态派发、结果收集、
//! 异步移交与锁释放；外加分片消费的 AIMD 自适应控制器与
//! 陈旧任务清理服务。

pub mod actions;
pub mod adaptive;
pub mod async_actions;
pub mod cleanup_service;
pub mod task_lock;
pub mod task_runner;

pub use actions::{ActionResults, Actions, ResultKey, TaskActions};
pub use adaptive::{
    AdaptiveShardConfig, AdaptiveShardStrategy, AggregateSnapshot, BatchResult, ShardSnapshot,
    StrategySnapshot,
};
pub use async_actions::AsyncActions;
pub use cleanup_service::{CleanupConfig, CleanupService};
pub use task_lock::{TaskLockConfig, TaskLockService};
pub use task_runner::{TaskRunner, TaskRunnerConfig};
