use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use cronq_errors::SchedulerResult;

use crate::executors::{ExecutorRegistry, TaskExecutor};

/// 默认执行器注册表
///
/// 以 `(queue_id, task_type)` 为键的内存注册表。
pub struct DefaultExecutorRegistry {
    executors: Arc<RwLock<HashMap<(String, String), Arc<dyn TaskExecutor>>>>,
}

impl DefaultExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 批量注册
    pub async fn register_batch(
        &self,
        executors: Vec<(String, String, Arc<dyn TaskExecutor>)>,
    ) -> SchedulerResult<()> {
        let mut registry = self.executors.write().await;
        for (queue_id, task_type, executor) in executors {
            registry.insert((queue_id, task_type), executor);
        }
        Ok(())
    }
}

impl Default for DefaultExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutorRegistry for DefaultExecutorRegistry {
    async fn register(
        &self,
        queue_id: &str,
        task_type: &str,
        executor: Arc<dyn TaskExecutor>,
    ) -> SchedulerResult<()> {
        let mut registry = self.executors.write().await;
        registry.insert((queue_id.to_string(), task_type.to_string()), executor);
        Ok(())
    }

    async fn get(&self, queue_id: &str, task_type: &str) -> Option<Arc<dyn TaskExecutor>> {
        let registry = self.executors.read().await;
        registry
            .get(&(queue_id.to_string(), task_type.to_string()))
            .cloned()
    }

    async fn unregister(&self, queue_id: &str, task_type: &str) -> SchedulerResult<bool> {
        let mut registry = self.executors.write().await;
        Ok(registry
            .remove(&(queue_id.to_string(), task_type.to_string()))
            .is_some())
    }

    async fn contains(&self, queue_id: &str, task_type: &str) -> bool {
        let registry = self.executors.read().await;
        registry.contains_key(&(queue_id.to_string(), task_type.to_string()))
    }

    async fn count(&self) -> usize {
        let registry = self.executors.read().await;
        registry.len()
    }

    async fn clear(&self) {
        let mut registry = self.executors.write().await;
        registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Task;
    use crate::executors::{ExecutorKind, TaskContext};
    use cronq_errors::SchedulerResult as TestResult;

    struct NoopExecutor;

    #[async_trait]
    impl TaskExecutor for NoopExecutor {
        fn name(&self) -> &str {
            "noop"
        }

        fn kind(&self) -> ExecutorKind {
            ExecutorKind::Sequential { handoff: None }
        }

        async fn execute(&self, _task: &Task, _ctx: &dyn TaskContext) -> TestResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = DefaultExecutorRegistry::new();
        registry
            .register("default", "mail", Arc::new(NoopExecutor))
            .await
            .unwrap();

        assert!(registry.contains("default", "mail").await);
        assert!(registry.get("default", "mail").await.is_some());
        // 同名类型在另一队列下不可见
        assert!(registry.get("other", "mail").await.is_none());
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_and_clear() {
        let registry = DefaultExecutorRegistry::new();
        registry
            .register("default", "mail", Arc::new(NoopExecutor))
            .await
            .unwrap();
        registry
            .register("default", "http", Arc::new(NoopExecutor))
            .await
            .unwrap();

        assert!(registry.unregister("default", "mail").await.unwrap());
        assert!(!registry.unregister("default", "mail").await.unwrap());

        registry.clear().await;
        assert_eq!(registry.count().await, 0);
    }
}
