use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use cronq_domain::{
    AsyncTaskManager, ExecutorKind, ExecutorRegistry, HandoffConfig, MessageQueue, Task,
    TaskExecutor, TaskStatus, TaskStore, TaskUpdate,
};
use cronq_errors::SchedulerResult;

use crate::actions::{ActionResults, Actions, ResultKey};
use crate::async_actions::AsyncActions;
use crate::task_lock::TaskLockService;

/// 调度器配置
#[derive(Debug, Clone)]
pub struct TaskRunnerConfig {
    /// 异步容量不足时的整组重排延迟（秒）
    pub capacity_reschedule_seconds: i64,
}

impl Default for TaskRunnerConfig {
    fn default() -> Self {
        Self {
            capacity_reschedule_seconds: 180,
        }
    }
}

/// 调度器
///
/// 每个 tick 的编排者：锁过滤与抢占、按 `(queue_id, task_type)` 分组、
/// 按执行器形态派发、同步结果抽取与落库、锁释放。所有依赖都通过
/// 构造函数注入，多个实例可以共存。
pub struct TaskRunner {
    task_store: Arc<dyn TaskStore>,
    executor_registry: Arc<dyn ExecutorRegistry>,
    lock_service: Arc<TaskLockService>,
    message_queue: Arc<dyn MessageQueue>,
    async_manager: Option<Arc<dyn AsyncTaskManager>>,
    config: TaskRunnerConfig,
}

impl TaskRunner {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        executor_registry: Arc<dyn ExecutorRegistry>,
        lock_service: Arc<TaskLockService>,
        message_queue: Arc<dyn MessageQueue>,
        async_manager: Option<Arc<dyn AsyncTaskManager>>,
        config: TaskRunnerConfig,
    ) -> Self {
        Self {
            task_store,
            executor_registry,
            lock_service,
            message_queue,
            async_manager,
            config,
        }
    }

    /// 拉取到期任务并执行一个完整 tick
    pub async fn run_once(&self) -> SchedulerResult<ActionResults> {
        let batch = self.task_store.get_mature_tasks(Utc::now()).await?;
        if batch.is_empty() {
            debug!("本轮没有到期任务");
            return Ok(ActionResults::default());
        }
        self.run_tick(batch).await
    }

    /// 对一批到期任务执行一个调度 tick
    pub async fn run_tick(&self, batch: Vec<Task>) -> SchedulerResult<ActionResults> {
        let total = batch.len();

        // 1. 过滤他人持有的任务并抢占剩余任务的锁
        let candidates = self
            .lock_service
            .filter_locked(batch, |task: &Task| task.id.map(task_lock_key))
            .await?;

        let mut locked: Vec<Task> = Vec::new();
        let mut lock_keys: Vec<String> = Vec::new();
        for task in candidates {
            let Some(id) = task.id else {
                // 没有持久化 id 的任务无法加锁，直接参与本轮
                locked.push(task);
                continue;
            };
            let key = task_lock_key(id);
            if self.lock_service.acquire(&key).await? {
                lock_keys.push(key);
                locked.push(task);
            }
        }
        if locked.len() < total {
            debug!("本轮 {} 个任务中 {} 个由其他实例处理", total, total - locked.len());
        }

        // 2. 按 (queue_id, task_type) 分组
        let mut groups: HashMap<(String, String), Vec<Task>> = HashMap::new();
        for task in locked {
            groups
                .entry((task.queue_id.clone(), task.task_type.clone()))
                .or_default()
                .push(task);
        }

        let actions = Actions::new();
        let async_actions = AsyncActions::new(
            actions.clone(),
            self.task_store.clone(),
            self.message_queue.clone(),
            self.executor_registry.clone(),
        );
        let mut handed_off: HashSet<ResultKey> = HashSet::new();

        for ((queue_id, task_type), group) in groups {
            if group.is_empty() {
                warn!("队列 {} 类型 {} 的任务组为空，跳过", queue_id, task_type);
                continue;
            }

            let Some(executor) = self.executor_registry.get(&queue_id, &task_type).await else {
                self.ignore_group(&actions, group, &task_type).await?;
                continue;
            };

            // 3. 准入检查：在途异步任务满载时整组延后
            if let ExecutorKind::Sequential { handoff: Some(_) } = executor.kind() {
                if let Some(manager) = &self.async_manager {
                    if !manager.can_accept_task().await {
                        self.reschedule_group(&group, &queue_id, &task_type).await?;
                        continue;
                    }
                }
            }

            let ids: Vec<i64> = group.iter().filter_map(|task| task.id).collect();
            if !ids.is_empty() {
                self.task_store.mark_tasks_as_processing(&ids).await?;
            }

            // 4. 按执行器形态派发
            match executor.kind() {
                ExecutorKind::Batch => {
                    self.dispatch_batch(&actions, executor, group, &queue_id, &task_type)
                        .await;
                }
                ExecutorKind::Parallel { chunk_size } => {
                    self.dispatch_parallel(&actions, executor, group, chunk_size)
                        .await;
                }
                ExecutorKind::Sequential { handoff: None } => {
                    self.dispatch_sequential(&actions, executor, group).await;
                }
                ExecutorKind::Sequential {
                    handoff: Some(handoff),
                } => {
                    self.dispatch_with_handoff(
                        &actions,
                        &async_actions,
                        executor,
                        group,
                        handoff,
                        &mut handed_off,
                    )
                    .await;
                }
            }
        }

        // 5. 抽取同步结果并落库；移交任务由各自的异步路径回写
        let results = actions.extract_sync_results(&handed_off);
        self.reconcile(&results, &async_actions).await?;

        // 6. 无条件释放本轮抢到的锁：锁保护的是 tick 内的独占，
        //    不覆盖移交任务的后续生命周期
        for key in lock_keys {
            if let Err(e) = self.lock_service.release(&key).await {
                warn!("释放锁 {} 失败: {}", key, e);
            }
        }

        info!(
            "tick 完成: 成功 {} 失败 {} 忽略 {} 新增 {} 移交 {}",
            results.success_tasks.len(),
            results.failed_tasks.len(),
            results.ignored_tasks.len(),
            results.new_tasks.len(),
            handed_off.len()
        );
        Ok(results)
    }

    /// 找不到执行器的任务组整组标记为忽略
    ///
    /// 路由失败是独立终态，不是失败，也不会重试。
    async fn ignore_group(
        &self,
        actions: &Actions,
        group: Vec<Task>,
        task_type: &str,
    ) -> SchedulerResult<()> {
        warn!("没有找到类型 {} 的执行器，整组任务标记为忽略", task_type);
        for mut task in group {
            if task.id.is_none() {
                task.id = Some(self.task_store.generate_id().await?);
            }
            task.record_stat(
                "ignore_reason",
                serde_json::json!(format!("no executor for type {task_type}")),
            );
            actions.add_ignored_task(task);
        }
        Ok(())
    }

    /// 容量导致的延后不是失败：不增加 retries，避免污染失败计数
    async fn reschedule_group(
        &self,
        group: &[Task],
        queue_id: &str,
        task_type: &str,
    ) -> SchedulerResult<()> {
        let execute_at =
            Utc::now() + chrono::Duration::seconds(self.config.capacity_reschedule_seconds);
        let updates: Vec<TaskUpdate> = group
            .iter()
            .filter_map(|task| task.id)
            .map(|id| TaskUpdate {
                id,
                execute_at: Some(execute_at),
                status: Some(TaskStatus::Scheduled),
                retries: None,
            })
            .collect();
        if !updates.is_empty() {
            self.task_store.update_tasks(&updates).await?;
        }
        info!(
            "异步容量不足，队列 {} 类型 {} 的 {} 个任务延后到 {}",
            queue_id,
            task_type,
            group.len(),
            execute_at.format("%H:%M:%S")
        );
        Ok(())
    }

    /// 批量执行放在独立任务上，执行器崩溃只降级本组
    async fn dispatch_batch(
        &self,
        actions: &Actions,
        executor: Arc<dyn TaskExecutor>,
        group: Vec<Task>,
        queue_id: &str,
        task_type: &str,
    ) {
        let root = actions.clone();
        let handle = tokio::spawn(async move { executor.execute_batch(&group, &root).await });
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("队列 {} 类型 {} 的批量执行返回错误: {}", queue_id, task_type, e);
            }
            Err(e) => {
                error!("队列 {} 类型 {} 的批量执行崩溃: {}", queue_id, task_type, e);
            }
        }
    }

    /// 分块有界并发：一个块完全结束后才开始下一个块
    async fn dispatch_parallel(
        &self,
        actions: &Actions,
        executor: Arc<dyn TaskExecutor>,
        group: Vec<Task>,
        chunk_size: usize,
    ) {
        let chunk_size = chunk_size.max(1);
        for chunk in group.chunks(chunk_size) {
            let futures = chunk.iter().map(|task| {
                let ctx = actions.fork_for_task(task);
                let executor = executor.clone();
                async move {
                    if let Err(e) = executor.execute(task, &ctx).await {
                        error!("任务 {:?} 执行返回错误: {}", task.id, e);
                    }
                }
            });
            join_all(futures).await;
        }
    }

    /// 严格按列表顺序执行；执行器约定在抛错前已调用 fail
    async fn dispatch_sequential(
        &self,
        actions: &Actions,
        executor: Arc<dyn TaskExecutor>,
        group: Vec<Task>,
    ) {
        for task in group {
            let ctx = actions.fork_for_task(&task);
            if let Err(e) = executor.execute(&task, &ctx).await {
                error!("任务 {:?} 执行返回错误: {}", task.id, e);
            }
        }
    }

    /// 带移交阈值的串行执行
    ///
    /// 执行放在独立任务上并通过 oneshot 汇报结果，调度循环对
    /// 通道做限时等待。超时先到时先关闭接收端再排空一次，保证
    /// 落定与超时的竞态只有一个赢家：要么按同步结果处理，要么
    /// 移交给异步路径。底层工作从不被取消。
    async fn dispatch_with_handoff(
        &self,
        actions: &Actions,
        async_actions: &AsyncActions,
        executor: Arc<dyn TaskExecutor>,
        group: Vec<Task>,
        handoff: HandoffConfig,
        handed_off: &mut HashSet<ResultKey>,
    ) {
        for task in group {
            let ctx = actions.fork_for_task(&task);
            let key = ctx.key();
            let (done_tx, mut done_rx) = oneshot::channel::<SchedulerResult<()>>();

            let spawned_executor = executor.clone();
            let tracker = async_actions.clone();
            let spawned_task = task.clone();
            tokio::spawn(async move {
                let result = spawned_executor.execute(&spawned_task, &ctx).await;
                if let Err(result) = done_tx.send(result) {
                    // 调度循环已经移开：结果改由异步路径回写
                    if let Err(e) = &result {
                        error!("移交任务 {:?} 执行返回错误: {}", spawned_task.id, e);
                    }
                    if spawned_task.id.is_some() {
                        if let Err(e) = tracker.on_promise_fulfilled(key, &spawned_task).await {
                            error!("移交任务 {:?} 异步回写失败: {}", spawned_task.id, e);
                        }
                    } else {
                        debug!("未跟踪的移交任务已自行结束");
                    }
                }
            });

            match tokio::time::timeout(Duration::from_millis(handoff.timeout_ms), &mut done_rx)
                .await
            {
                Ok(Ok(result)) => {
                    if let Err(e) = result {
                        error!("任务 {:?} 执行返回错误: {}", task.id, e);
                    }
                }
                Ok(Err(_)) => {
                    error!(
                        "任务 {:?} 的执行器崩溃，任务留在 processing 等待清理重排",
                        task.id
                    );
                }
                Err(_) => {
                    done_rx.close();
                    match done_rx.try_recv() {
                        Ok(result) => {
                            // 在超时边沿落定，按同步结果处理
                            if let Err(e) = result {
                                error!("任务 {:?} 执行返回错误: {}", task.id, e);
                            }
                        }
                        Err(_) => {
                            if task.id.is_some() {
                                debug!(
                                    "任务 {:?} 超过移交阈值 {}ms，转入异步跟踪",
                                    task.id, handoff.timeout_ms
                                );
                                handed_off.insert(key);
                            } else {
                                warn!(
                                    queue_id = %task.queue_id,
                                    task_type = %task.task_type,
                                    "移交任务缺少持久化 id，任务继续运行但不被跟踪"
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    async fn reconcile(
        &self,
        results: &ActionResults,
        async_actions: &AsyncActions,
    ) -> SchedulerResult<()> {
        if !results.success_tasks.is_empty() {
            self.task_store
                .mark_tasks_as_executed(&results.success_tasks)
                .await?;
        }
        if !results.failed_tasks.is_empty() {
            self.task_store
                .mark_tasks_as_failed(&results.failed_tasks)
                .await?;
        }
        if !results.ignored_tasks.is_empty() {
            self.task_store
                .mark_tasks_as_ignored(&results.ignored_tasks)
                .await?;
        }
        if !results.new_tasks.is_empty() {
            async_actions
                .route_new_tasks(results.new_tasks.clone())
                .await?;
        }
        Ok(())
    }
}

fn task_lock_key(id: i64) -> String {
    format!("task:{id}")
}
