use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use cronq_dispatcher::{Actions, AsyncActions};
use cronq_domain::{
    DefaultExecutorRegistry, ExecutorKind, ExecutorRegistry, Task, TaskContext, TaskExecutor,
};
use cronq_errors::{SchedulerError, SchedulerResult};
use cronq_testing_utils::{MockMessageQueue, MockTaskStore, TaskBuilder};

fn build_async_actions(
    actions: &Actions,
    store: &MockTaskStore,
    queue: &MockMessageQueue,
    registry: Arc<DefaultExecutorRegistry>,
) -> AsyncActions {
    AsyncActions::new(
        actions.clone(),
        Arc::new(store.clone()),
        Arc::new(queue.clone()),
        registry,
    )
}

#[tokio::test]
async fn test_settled_success_is_written_back() {
    let actions = Actions::new();
    let store = MockTaskStore::new();
    let queue = MockMessageQueue::new();
    let async_actions =
        build_async_actions(&actions, &store, &queue, Arc::new(DefaultExecutorRegistry::new()));

    let task = TaskBuilder::new().with_id(7).build();
    let fork = actions.fork_for_task(&task);
    fork.success(task.clone());

    async_actions
        .on_promise_fulfilled(fork.key(), &task)
        .await
        .unwrap();

    let executed = store.executed_tasks();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].id, Some(7));
}

#[tokio::test]
async fn test_settled_failure_is_written_back() {
    let actions = Actions::new();
    let store = MockTaskStore::new();
    let queue = MockMessageQueue::new();
    let async_actions =
        build_async_actions(&actions, &store, &queue, Arc::new(DefaultExecutorRegistry::new()));

    let task = TaskBuilder::new().with_id(7).build();
    let fork = actions.fork_for_task(&task);
    fork.fail(task.clone());

    async_actions
        .on_promise_fulfilled(fork.key(), &task)
        .await
        .unwrap();

    assert_eq!(store.failed_tasks().len(), 1);
    assert!(store.executed_tasks().is_empty());
}

#[tokio::test]
async fn test_missing_outcome_is_a_hard_error() {
    let actions = Actions::new();
    let store = MockTaskStore::new();
    let queue = MockMessageQueue::new();
    let async_actions =
        build_async_actions(&actions, &store, &queue, Arc::new(DefaultExecutorRegistry::new()));

    let task = TaskBuilder::new().with_id(7).build();
    let fork = actions.fork_for_task(&task);
    // 执行器既没调用 success 也没调用 fail

    let result = async_actions.on_promise_fulfilled(fork.key(), &task).await;
    assert!(matches!(
        result,
        Err(SchedulerError::IncompleteTaskResult { task_id: 7 })
    ));
    assert!(store.executed_tasks().is_empty());
    assert!(store.failed_tasks().is_empty());
}

#[tokio::test]
async fn test_second_extraction_fails_after_first() {
    let actions = Actions::new();
    let store = MockTaskStore::new();
    let queue = MockMessageQueue::new();
    let async_actions =
        build_async_actions(&actions, &store, &queue, Arc::new(DefaultExecutorRegistry::new()));

    let task = TaskBuilder::new().with_id(7).build();
    let fork = actions.fork_for_task(&task);
    fork.success(task.clone());

    async_actions
        .on_promise_fulfilled(fork.key(), &task)
        .await
        .unwrap();
    // 结果已被取走，再次抽取视为契约违反
    let result = async_actions.on_promise_fulfilled(fork.key(), &task).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_new_tasks_split_by_horizon() {
    let actions = Actions::new();
    let store = MockTaskStore::new();
    let queue = MockMessageQueue::new();
    let async_actions =
        build_async_actions(&actions, &store, &queue, Arc::new(DefaultExecutorRegistry::new()));

    let task = TaskBuilder::new().with_id(7).build();
    let fork = actions.fork_for_task(&task);
    fork.schedule_new(
        TaskBuilder::new()
            .without_id()
            .with_execute_at(Utc::now() + chrono::Duration::seconds(30))
            .build(),
    );
    fork.schedule_new(
        TaskBuilder::new()
            .without_id()
            .with_execute_at(Utc::now() + chrono::Duration::hours(2))
            .build(),
    );
    fork.success(task.clone());

    async_actions
        .on_promise_fulfilled(fork.key(), &task)
        .await
        .unwrap();

    assert_eq!(queue.published("default").len(), 1);
    assert_eq!(store.created_tasks().len(), 1);
}

struct DurableIdExecutor;

#[async_trait]
impl TaskExecutor for DurableIdExecutor {
    fn name(&self) -> &str {
        "durable"
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Sequential { handoff: None }
    }

    fn store_on_failure(&self) -> bool {
        true
    }

    async fn execute(&self, task: &Task, ctx: &dyn TaskContext) -> SchedulerResult<()> {
        ctx.success(task.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_near_task_gets_durable_id_when_executor_requires_it() {
    let actions = Actions::new();
    let store = MockTaskStore::new();
    let queue = MockMessageQueue::new();
    let registry = Arc::new(DefaultExecutorRegistry::new());
    registry
        .register("default", "mail", Arc::new(DurableIdExecutor))
        .await
        .unwrap();
    let async_actions = build_async_actions(&actions, &store, &queue, registry);

    let near = TaskBuilder::new()
        .without_id()
        .with_task_type("mail")
        .with_execute_at(Utc::now() + chrono::Duration::seconds(10))
        .build();
    async_actions.route_new_tasks(vec![near]).await.unwrap();

    let published = queue.published("default");
    assert_eq!(published.len(), 1);
    // 入队前被分配了持久化 id
    assert!(published[0].task.id.is_some());
}

#[tokio::test]
async fn test_near_task_without_requirement_keeps_no_id() {
    let actions = Actions::new();
    let store = MockTaskStore::new();
    let queue = MockMessageQueue::new();
    let async_actions =
        build_async_actions(&actions, &store, &queue, Arc::new(DefaultExecutorRegistry::new()));

    let near = TaskBuilder::new()
        .without_id()
        .with_execute_at(Utc::now() + chrono::Duration::seconds(10))
        .build();
    async_actions.route_new_tasks(vec![near]).await.unwrap();

    let published = queue.published("default");
    assert_eq!(published.len(), 1);
    assert!(published[0].task.id.is_none());
}
