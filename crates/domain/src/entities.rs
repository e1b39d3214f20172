use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务定义
///
/// 系统中可调度执行的最小单元。`id` 由任务存储生成，入库前为 `None`；
/// `payload` 对核心完全不透明，按原样交给执行器。
///
/// # 字段说明
///
/// - `task_type`: 执行器注册表的类型键
/// - `queue_id`: 任务所属队列
/// - `execute_at`: 到期时间，早于当前时间且状态为 Scheduled 即为成熟任务
/// - `retry_after_seconds`: 失败重新入队时的退避提示（秒），由存储应用
/// - `execution_stats`: 自由格式的诊断信息，例如 `failed_at`、`ignore_reason`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Option<i64>,
    pub task_type: String,
    pub queue_id: String,
    pub payload: serde_json::Value,
    pub execute_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub retry_after_seconds: Option<i64>,
    pub status: TaskStatus,
    pub retries: i32,
    pub execution_stats: HashMap<String, serde_json::Value>,
    pub task_group: Option<String>,
    pub task_hash: Option<String>,
}

/// 任务状态
///
/// 一个任务同一时刻只被一把锁持有；`processing_started_at` 仅在
/// Processing 状态下有值，超过陈旧窗口由清理任务重置。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    #[serde(rename = "SCHEDULED")]
    Scheduled,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "EXECUTED")]
    Executed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "IGNORED")]
    Ignored,
}

impl Task {
    /// 创建一个待调度的新任务
    pub fn new(
        queue_id: impl Into<String>,
        task_type: impl Into<String>,
        payload: serde_json::Value,
        execute_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            task_type: task_type.into(),
            queue_id: queue_id.into(),
            payload,
            execute_at,
            created_at: now,
            updated_at: now,
            processing_started_at: None,
            expires_at: None,
            retry_after_seconds: None,
            status: TaskStatus::Scheduled,
            retries: 0,
            execution_stats: HashMap::new(),
            task_group: None,
            task_hash: None,
        }
    }

    /// 任务是否到期且可被调度
    pub fn is_mature(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, TaskStatus::Scheduled) && self.execute_at <= now
    }

    /// 任务是否处于终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Executed | TaskStatus::Failed | TaskStatus::Ignored
        )
    }

    /// 写入一条诊断信息
    pub fn record_stat(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.execution_stats.insert(key.into(), value);
    }
}

/// 消息信封
///
/// 队列承载的传输单元；`id` 仅用于日志关联，不参与任务身份。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub task: Task,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: i32,
}

impl Message {
    pub fn from_task(task: Task) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task,
            enqueued_at: Utc::now(),
            retry_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_task_defaults() {
        let due = Utc::now();
        let task = Task::new("default", "mail", json!({"to": "ops"}), due);

        assert!(task.id.is_none());
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert_eq!(task.retries, 0);
        assert!(task.processing_started_at.is_none());
        assert!(task.execution_stats.is_empty());
    }

    #[test]
    fn test_is_mature() {
        let now = Utc::now();
        let mut task = Task::new("default", "mail", json!({}), now - chrono::Duration::seconds(1));
        assert!(task.is_mature(now));

        task.execute_at = now + chrono::Duration::minutes(5);
        assert!(!task.is_mature(now));

        task.execute_at = now - chrono::Duration::seconds(1);
        task.status = TaskStatus::Processing;
        assert!(!task.is_mature(now));
    }

    #[test]
    fn test_message_wraps_task() {
        let task = Task::new("default", "mail", json!({}), Utc::now());
        let message = Message::from_task(task.clone());

        assert!(!message.id.is_empty());
        assert_eq!(message.retry_count, 0);
        assert_eq!(message.task.task_type, task.task_type);
    }
}
