//! Test executors covering every executor shape

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use cronq_domain::{ExecutorKind, HandoffConfig, Task, TaskContext, TaskExecutor};
use cronq_errors::{SchedulerError, SchedulerResult};

fn lock_guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks every task as success and records the ids it saw, in order
pub struct RecordingExecutor {
    kind: ExecutorKind,
    executed: Arc<Mutex<Vec<Option<i64>>>>,
    batch_calls: Arc<Mutex<Vec<usize>>>,
}

impl RecordingExecutor {
    pub fn sequential() -> Arc<Self> {
        Arc::new(Self {
            kind: ExecutorKind::Sequential { handoff: None },
            executed: Arc::new(Mutex::new(Vec::new())),
            batch_calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn parallel(chunk_size: usize) -> Arc<Self> {
        Arc::new(Self {
            kind: ExecutorKind::Parallel { chunk_size },
            executed: Arc::new(Mutex::new(Vec::new())),
            batch_calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn batch() -> Arc<Self> {
        Arc::new(Self {
            kind: ExecutorKind::Batch,
            executed: Arc::new(Mutex::new(Vec::new())),
            batch_calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn executed_ids(&self) -> Vec<Option<i64>> {
        lock_guard(&self.executed).clone()
    }

    /// Group sizes seen by `execute_batch`, one entry per call
    pub fn batch_call_sizes(&self) -> Vec<usize> {
        lock_guard(&self.batch_calls).clone()
    }
}

#[async_trait]
impl TaskExecutor for RecordingExecutor {
    fn name(&self) -> &str {
        "recording"
    }

    fn kind(&self) -> ExecutorKind {
        self.kind
    }

    async fn execute(&self, task: &Task, ctx: &dyn TaskContext) -> SchedulerResult<()> {
        lock_guard(&self.executed).push(task.id);
        ctx.success(task.clone());
        Ok(())
    }

    async fn execute_batch(&self, tasks: &[Task], ctx: &dyn TaskContext) -> SchedulerResult<()> {
        lock_guard(&self.batch_calls).push(tasks.len());
        for task in tasks {
            lock_guard(&self.executed).push(task.id);
            ctx.success(task.clone());
        }
        Ok(())
    }
}

/// Calls fail() and then returns an error, as a well-behaved executor should
pub struct FailingExecutor;

impl FailingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl TaskExecutor for FailingExecutor {
    fn name(&self) -> &str {
        "failing"
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Sequential { handoff: None }
    }

    async fn execute(&self, task: &Task, ctx: &dyn TaskContext) -> SchedulerResult<()> {
        ctx.fail(task.clone());
        Err(SchedulerError::task_execution_error("intentional failure"))
    }
}

/// Sleeps before succeeding, for handoff-timeout tests
pub struct SlowExecutor {
    delay: Duration,
    handoff_timeout_ms: u64,
}

impl SlowExecutor {
    pub fn new(delay_ms: u64, handoff_timeout_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::from_millis(delay_ms),
            handoff_timeout_ms,
        })
    }
}

#[async_trait]
impl TaskExecutor for SlowExecutor {
    fn name(&self) -> &str {
        "slow"
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Sequential {
            handoff: Some(HandoffConfig {
                timeout_ms: self.handoff_timeout_ms,
            }),
        }
    }

    async fn execute(&self, task: &Task, ctx: &dyn TaskContext) -> SchedulerResult<()> {
        tokio::time::sleep(self.delay).await;
        ctx.success(task.clone());
        Ok(())
    }
}

/// Settles without recording any outcome — violates the async
/// completion contract on purpose
pub struct SilentExecutor {
    delay: Duration,
    handoff_timeout_ms: u64,
}

impl SilentExecutor {
    pub fn new(delay_ms: u64, handoff_timeout_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::from_millis(delay_ms),
            handoff_timeout_ms,
        })
    }
}

#[async_trait]
impl TaskExecutor for SilentExecutor {
    fn name(&self) -> &str {
        "silent"
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Sequential {
            handoff: Some(HandoffConfig {
                timeout_ms: self.handoff_timeout_ms,
            }),
        }
    }

    async fn execute(&self, _task: &Task, _ctx: &dyn TaskContext) -> SchedulerResult<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// Succeeds and schedules follow-up tasks through the context
pub struct SchedulingExecutor {
    follow_ups: Vec<Task>,
}

impl SchedulingExecutor {
    pub fn new(follow_ups: Vec<Task>) -> Arc<Self> {
        Arc::new(Self { follow_ups })
    }
}

#[async_trait]
impl TaskExecutor for SchedulingExecutor {
    fn name(&self) -> &str {
        "scheduling"
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Sequential { handoff: None }
    }

    async fn execute(&self, task: &Task, ctx: &dyn TaskContext) -> SchedulerResult<()> {
        for follow_up in &self.follow_ups {
            ctx.schedule_new(follow_up.clone());
        }
        ctx.success(task.clone());
        Ok(())
    }
}
