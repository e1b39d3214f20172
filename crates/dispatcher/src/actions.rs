use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use cronq_domain::{Task, TaskContext};

/// 结果键
///
/// 已入库任务使用持久化 id；没有 id 的任务在一次 tick 内使用
/// 递增的匿名键。匿名键无法用于异步移交跟踪。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKey {
    Stored(i64),
    Anon(u64),
}

/// 根上下文（非分叉写入）使用的保留键
const ROOT_KEY: ResultKey = ResultKey::Anon(0);

#[derive(Debug, Clone)]
pub(crate) enum TaskOutcome {
    Success(Task),
    Failed(Task),
}

#[derive(Debug, Default)]
struct ActionState {
    outcomes: HashMap<ResultKey, TaskOutcome>,
    /// 新任务按来源分叉聚合，异步路径只取走属于自己的那份
    new_tasks: HashMap<ResultKey, Vec<Task>>,
    ignored: Vec<Task>,
    anon_seq: u64,
}

impl ActionState {
    fn key_for(&mut self, task: &Task) -> ResultKey {
        match task.id {
            Some(id) => ResultKey::Stored(id),
            None => {
                self.anon_seq += 1;
                ResultKey::Anon(self.anon_seq)
            }
        }
    }

    fn record(&mut self, key: ResultKey, outcome: TaskOutcome) {
        // 一个任务只允许落入一个结果桶，后写覆盖先写
        if self.outcomes.insert(key, outcome).is_some() {
            warn!("任务 {:?} 的执行结果被覆盖改写", key);
        }
    }
}

/// 根结果收集器
///
/// 每个 tick 一个实例。`fork_for_task` 为并发执行器派生相互隔离的
/// 写入面，所有写入仍汇入同一份根状态，因此一次抽取就能覆盖
/// 整个运行。克隆是廉价的句柄复制。
#[derive(Clone, Default)]
pub struct Actions {
    state: Arc<Mutex<ActionState>>,
}

impl Actions {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, ActionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 为单个任务派生隔离的写入面
    pub fn fork_for_task(&self, task: &Task) -> TaskActions {
        let key = self.guard().key_for(task);
        TaskActions {
            state: self.state.clone(),
            key,
        }
    }

    pub fn success(&self, task: Task) {
        let mut state = self.guard();
        let key = state.key_for(&task);
        state.record(key, TaskOutcome::Success(task));
    }

    pub fn fail(&self, task: Task) {
        let mut state = self.guard();
        let key = state.key_for(&task);
        state.record(key, TaskOutcome::Failed(task));
    }

    /// 在根上下文中登记一个待调度的新任务
    pub fn schedule_new(&self, task: Task) {
        self.guard().new_tasks.entry(ROOT_KEY).or_default().push(task);
    }

    /// 登记一个找不到执行器的任务
    pub fn add_ignored_task(&self, task: Task) {
        self.guard().ignored.push(task);
    }

    /// 抽取同步结果
    ///
    /// 移除 `exclude` 之外的全部条目；被移交任务的条目原样留下，
    /// 等待各自的 [`crate::AsyncActions`] 抽取。
    pub fn extract_sync_results(&self, exclude: &HashSet<ResultKey>) -> ActionResults {
        let mut state = self.guard();
        let mut results = ActionResults::default();

        let keys: Vec<ResultKey> = state
            .outcomes
            .keys()
            .copied()
            .filter(|key| !exclude.contains(key))
            .collect();
        for key in keys {
            match state.outcomes.remove(&key) {
                Some(TaskOutcome::Success(task)) => results.success_tasks.push(task),
                Some(TaskOutcome::Failed(task)) => results.failed_tasks.push(task),
                None => {}
            }
        }

        let new_keys: Vec<ResultKey> = state
            .new_tasks
            .keys()
            .copied()
            .filter(|key| !exclude.contains(key))
            .collect();
        for key in new_keys {
            if let Some(mut tasks) = state.new_tasks.remove(&key) {
                results.new_tasks.append(&mut tasks);
            }
        }

        results.ignored_tasks = std::mem::take(&mut state.ignored);
        results
    }

    /// 抽取单个任务的结果与其派生的新任务（异步回写路径）
    pub(crate) fn extract_task_results(&self, key: ResultKey) -> (Option<TaskOutcome>, Vec<Task>) {
        let mut state = self.guard();
        (
            state.outcomes.remove(&key),
            state.new_tasks.remove(&key).unwrap_or_default(),
        )
    }
}

impl TaskContext for Actions {
    fn success(&self, task: Task) {
        Actions::success(self, task);
    }

    fn fail(&self, task: Task) {
        Actions::fail(self, task);
    }

    fn schedule_new(&self, task: Task) {
        Actions::schedule_new(self, task);
    }
}

/// 单任务隔离写入面
///
/// 所有写入都落在派生时确定的键下，并发执行器之间互不干扰。
#[derive(Clone)]
pub struct TaskActions {
    state: Arc<Mutex<ActionState>>,
    key: ResultKey,
}

impl TaskActions {
    pub fn key(&self) -> ResultKey {
        self.key
    }

    fn guard(&self) -> MutexGuard<'_, ActionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn success(&self, task: Task) {
        self.guard().record(self.key, TaskOutcome::Success(task));
    }

    pub fn fail(&self, task: Task) {
        self.guard().record(self.key, TaskOutcome::Failed(task));
    }

    pub fn schedule_new(&self, task: Task) {
        self.guard().new_tasks.entry(self.key).or_default().push(task);
    }
}

impl TaskContext for TaskActions {
    fn success(&self, task: Task) {
        TaskActions::success(self, task);
    }

    fn fail(&self, task: Task) {
        TaskActions::fail(self, task);
    }

    fn schedule_new(&self, task: Task) {
        TaskActions::schedule_new(self, task);
    }
}

/// 一次 tick 的同步结果
#[derive(Debug, Clone, Default)]
pub struct ActionResults {
    pub success_tasks: Vec<Task>,
    pub failed_tasks: Vec<Task>,
    pub new_tasks: Vec<Task>,
    pub ignored_tasks: Vec<Task>,
}

impl ActionResults {
    pub fn is_empty(&self) -> bool {
        self.success_tasks.is_empty()
            && self.failed_tasks.is_empty()
            && self.new_tasks.is_empty()
            && self.ignored_tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn stored_task(id: i64) -> Task {
        let mut task = Task::new("default", "mail", json!({}), Utc::now());
        task.id = Some(id);
        task
    }

    #[test]
    fn test_forks_are_isolated_but_share_root_state() {
        let actions = Actions::new();
        let task1 = stored_task(1);
        let task2 = stored_task(2);

        let fork1 = actions.fork_for_task(&task1);
        let fork2 = actions.fork_for_task(&task2);
        fork1.success(task1);
        fork2.fail(task2);

        let results = actions.extract_sync_results(&HashSet::new());
        assert_eq!(results.success_tasks.len(), 1);
        assert_eq!(results.failed_tasks.len(), 1);
        assert_eq!(results.success_tasks[0].id, Some(1));
        assert_eq!(results.failed_tasks[0].id, Some(2));
    }

    #[test]
    fn test_last_write_wins_within_one_fork() {
        let actions = Actions::new();
        let task = stored_task(1);
        let fork = actions.fork_for_task(&task);

        fork.success(task.clone());
        fork.fail(task);

        let results = actions.extract_sync_results(&HashSet::new());
        assert!(results.success_tasks.is_empty());
        assert_eq!(results.failed_tasks.len(), 1);
    }

    #[test]
    fn test_extract_skips_excluded_keys() {
        let actions = Actions::new();
        let kept = stored_task(1);
        let handed_off = stored_task(2);

        let fork1 = actions.fork_for_task(&kept);
        let fork2 = actions.fork_for_task(&handed_off);
        fork1.success(kept);
        fork2.success(handed_off.clone());
        fork2.schedule_new(stored_task(3));

        let mut exclude = HashSet::new();
        exclude.insert(fork2.key());
        let results = actions.extract_sync_results(&exclude);

        assert_eq!(results.success_tasks.len(), 1);
        assert_eq!(results.success_tasks[0].id, Some(1));
        assert!(results.new_tasks.is_empty());

        // 被排除的条目留给异步路径
        let (outcome, new_tasks) = actions.extract_task_results(fork2.key());
        assert!(outcome.is_some());
        assert_eq!(new_tasks.len(), 1);
    }

    #[test]
    fn test_anon_keys_for_tasks_without_id() {
        let actions = Actions::new();
        let task = Task::new("default", "mail", json!({}), Utc::now());

        let fork1 = actions.fork_for_task(&task);
        let fork2 = actions.fork_for_task(&task);
        assert_ne!(fork1.key(), fork2.key());
        assert!(matches!(fork1.key(), ResultKey::Anon(_)));
    }

    #[test]
    fn test_root_schedule_new_extracted_with_sync_results() {
        let actions = Actions::new();
        actions.schedule_new(stored_task(9));

        let results = actions.extract_sync_results(&HashSet::new());
        assert_eq!(results.new_tasks.len(), 1);
    }
}
