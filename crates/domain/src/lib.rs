//! 调度系统领域层
//!
//! 定义实体、协作者端口与执行器契约，遵循依赖倒置原则：
//! 核心只通过这里的窄接口访问持久化、锁缓存与消息队列。

pub mod entities;
pub mod executors;
pub mod messaging;
pub mod registry;
pub mod repositories;

pub use entities::{Message, Task, TaskStatus};
pub use executors::{ExecutorKind, ExecutorRegistry, HandoffConfig, TaskContext, TaskExecutor};
pub use messaging::{MessageConsumer, MessageQueue};
pub use registry::DefaultExecutorRegistry;
pub use repositories::{
    AsyncTaskManager, CleanupReport, CleanupStats, LockCache, TaskStore, TaskUpdate,
};

pub use cronq_errors::{SchedulerError, SchedulerResult};
