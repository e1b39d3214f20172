use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use cronq_domain::{Task, TaskStatus};

/// Builder for test tasks with sensible defaults
///
/// Defaults to a stored, mature task on the `default` queue.
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        let mut task = Task::new(
            "default",
            "mail",
            json!({}),
            Utc::now() - Duration::seconds(1),
        );
        task.id = Some(1);
        Self { task }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = Some(id);
        self
    }

    pub fn without_id(mut self) -> Self {
        self.task.id = None;
        self
    }

    pub fn with_queue_id(mut self, queue_id: &str) -> Self {
        self.task.queue_id = queue_id.to_string();
        self
    }

    pub fn with_task_type(mut self, task_type: &str) -> Self {
        self.task.task_type = task_type.to_string();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.task.payload = payload;
        self
    }

    pub fn with_execute_at(mut self, execute_at: DateTime<Utc>) -> Self {
        self.task.execute_at = execute_at;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_retry_after_seconds(mut self, seconds: i64) -> Self {
        self.task.retry_after_seconds = Some(seconds);
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.task.expires_at = Some(expires_at);
        self
    }

    pub fn with_task_group(mut self, group: &str) -> Self {
        self.task.task_group = Some(group.to_string());
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}
