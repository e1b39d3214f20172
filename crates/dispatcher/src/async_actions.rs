use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::debug;

use cronq_domain::{ExecutorRegistry, Message, MessageQueue, Task, TaskStore};
use cronq_errors::{SchedulerError, SchedulerResult};

use crate::actions::{Actions, ResultKey, TaskOutcome};

/// 近端投递窗口：到期早于该窗口的新任务直接走消息队列
const NEAR_HORIZON_SECONDS: i64 = 120;

/// 移交任务的异步回写器
///
/// 与本次 tick 共享同一份根收集器。被移交任务的 promise 落定后，
/// 调度循环早已移开，这里把仅属于该任务的结果回写到任务存储。
#[derive(Clone)]
pub struct AsyncActions {
    actions: Actions,
    task_store: Arc<dyn TaskStore>,
    message_queue: Arc<dyn MessageQueue>,
    executor_registry: Arc<dyn ExecutorRegistry>,
}

impl AsyncActions {
    pub fn new(
        actions: Actions,
        task_store: Arc<dyn TaskStore>,
        message_queue: Arc<dyn MessageQueue>,
        executor_registry: Arc<dyn ExecutorRegistry>,
    ) -> Self {
        Self {
            actions,
            task_store,
            message_queue,
            executor_registry,
        }
    }

    /// 移交任务落定后调用，每个任务恰好一次
    ///
    /// 任务既未标记成功也未标记失败时快速失败：此时没有任何其他
    /// 信号可用，无声丢失比响亮的错误更糟。支持异步移交的执行器
    /// 必须显式终结它处理的每个任务。
    pub async fn on_promise_fulfilled(&self, key: ResultKey, task: &Task) -> SchedulerResult<()> {
        let (outcome, new_tasks) = self.actions.extract_task_results(key);
        match outcome {
            Some(TaskOutcome::Success(done)) => {
                self.task_store
                    .mark_tasks_as_executed(std::slice::from_ref(&done))
                    .await?;
                debug!("移交任务 {:?} 异步回写为已执行", done.id);
            }
            Some(TaskOutcome::Failed(done)) => {
                self.task_store
                    .mark_tasks_as_failed(std::slice::from_ref(&done))
                    .await?;
                debug!("移交任务 {:?} 异步回写为失败", done.id);
            }
            None => {
                return Err(SchedulerError::IncompleteTaskResult {
                    task_id: task.id.unwrap_or_default(),
                });
            }
        }
        self.route_new_tasks(new_tasks).await
    }

    /// 把新任务按到期水平线分流
    ///
    /// 近端任务直接入队等待就近拉取；远端任务落库为 Scheduled，
    /// 由后续 tick 自然捞起。
    pub async fn route_new_tasks(&self, tasks: Vec<Task>) -> SchedulerResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let horizon = Utc::now() + Duration::seconds(NEAR_HORIZON_SECONDS);
        let mut to_persist = Vec::new();

        for mut task in tasks {
            if task.execute_at <= horizon {
                if task.id.is_none() && self.requires_durable_id(&task).await {
                    task.id = Some(self.task_store.generate_id().await?);
                }
                let queue = task.queue_id.clone();
                self.message_queue
                    .add_messages(&queue, vec![Message::from_task(task)])
                    .await?;
            } else {
                to_persist.push(task);
            }
        }

        if !to_persist.is_empty() {
            debug!("{} 个远端新任务落库等待调度", to_persist.len());
            self.task_store.create_tasks(&to_persist).await?;
        }
        Ok(())
    }

    async fn requires_durable_id(&self, task: &Task) -> bool {
        match self
            .executor_registry
            .get(&task.queue_id, &task.task_type)
            .await
        {
            Some(executor) => executor.store_on_failure(),
            None => false,
        }
    }
}
