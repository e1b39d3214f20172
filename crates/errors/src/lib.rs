use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },
    #[error("队列未注册: {0}")]
    QueueNotRegistered(String),
    #[error("消息队列错误: {0}")]
    MessageQueue(String),
    #[error("缓存错误: {0}")]
    Cache(String),
    #[error("任务 {task_id} 的异步执行结束时未记录任何结果")]
    IncompleteTaskResult { task_id: i64 },
    #[error("任务执行错误: {0}")]
    TaskExecution(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn message_queue_error<S: Into<String>>(msg: S) -> Self {
        Self::MessageQueue(msg.into())
    }
    pub fn cache_error<S: Into<String>>(msg: S) -> Self {
        Self::Cache(msg.into())
    }
    pub fn task_execution_error<S: Into<String>>(msg: S) -> Self {
        Self::TaskExecution(msg.into())
    }
    pub fn serialization_error<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }
    pub fn configuration_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn internal_error<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_contains_context() {
        let err = SchedulerError::TaskNotFound { id: 42 };
        assert!(err.to_string().contains("42"));

        let err = SchedulerError::QueueNotRegistered("jobs".to_string());
        assert!(err.to_string().contains("jobs"));

        let err = SchedulerError::IncompleteTaskResult { task_id: 7 };
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn test_helper_constructors() {
        assert!(matches!(
            SchedulerError::message_queue_error("boom"),
            SchedulerError::MessageQueue(_)
        ));
        assert!(matches!(
            SchedulerError::cache_error("boom"),
            SchedulerError::Cache(_)
        ));
        assert!(matches!(
            SchedulerError::configuration_error("boom"),
            SchedulerError::Configuration(_)
        ));
    }
}
