use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use cronq_domain::{Message, MessageConsumer, MessageQueue};
use cronq_errors::{SchedulerError, SchedulerResult};

/// 内存消息队列配置
#[derive(Debug, Clone)]
pub struct InMemoryQueueConfig {
    /// 常驻消费者的轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 常驻消费者每次轮询的批量上限
    pub poll_batch_limit: usize,
}

impl Default for InMemoryQueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            poll_batch_limit: 50,
        }
    }
}

#[derive(Default)]
struct QueueState {
    buffer: VecDeque<Message>,
    consumer: Option<Arc<dyn MessageConsumer>>,
    poller: Option<JoinHandle<()>>,
}

/// 内存消息队列实现
///
/// 每个队列一个 FIFO 缓冲区；常驻消费者由轮询间隔驱动。
/// 消费失败的批次按原顺序放回队首，消息不会丢失。
/// 适用于嵌入式部署与测试。
pub struct InMemoryMessageQueue {
    queues: Arc<RwLock<HashMap<String, Arc<Mutex<QueueState>>>>>,
    config: InMemoryQueueConfig,
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::with_config(InMemoryQueueConfig::default())
    }

    pub fn with_config(config: InMemoryQueueConfig) -> Self {
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    async fn queue_state(&self, queue: &str) -> SchedulerResult<Arc<Mutex<QueueState>>> {
        self.queues
            .read()
            .await
            .get(queue)
            .cloned()
            .ok_or_else(|| SchedulerError::QueueNotRegistered(queue.to_string()))
    }

    /// 拉取至多 limit 条消息交给消费者；失败的批次按原顺序放回队首
    async fn poll_once(
        state: &Arc<Mutex<QueueState>>,
        consumer: &Arc<dyn MessageConsumer>,
        limit: usize,
    ) -> SchedulerResult<usize> {
        let batch: Vec<Message> = {
            let mut queue_state = state.lock().await;
            let count = limit.min(queue_state.buffer.len());
            queue_state.buffer.drain(..count).collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }

        match consumer.consume(batch.clone()).await {
            Ok(()) => Ok(batch.len()),
            Err(e) => {
                let mut queue_state = state.lock().await;
                for message in batch.into_iter().rev() {
                    queue_state.buffer.push_front(message);
                }
                Err(e)
            }
        }
    }
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn register(&self, queue: &str) -> SchedulerResult<()> {
        let mut queues = self.queues.write().await;
        if queues.contains_key(queue) {
            debug!("Queue '{}' already registered", queue);
            return Ok(());
        }
        queues.insert(
            queue.to_string(),
            Arc::new(Mutex::new(QueueState::default())),
        );
        info!("Registered queue '{}'", queue);
        Ok(())
    }

    async fn add_messages(&self, queue: &str, messages: Vec<Message>) -> SchedulerResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let state = self.queue_state(queue).await?;
        let mut queue_state = state.lock().await;
        let count = messages.len();
        queue_state.buffer.extend(messages);
        debug!(
            "Added {} messages to queue '{}' (size: {})",
            count,
            queue,
            queue_state.buffer.len()
        );
        Ok(())
    }

    async fn consume_messages_stream(
        &self,
        queue: &str,
        consumer: Arc<dyn MessageConsumer>,
        mut cancel: watch::Receiver<bool>,
    ) -> SchedulerResult<()> {
        let state = self.queue_state(queue).await?;
        {
            let mut queue_state = state.lock().await;
            if queue_state.consumer.is_some() {
                warn!(
                    "Queue '{}' already has a consumer installed, ignoring re-registration",
                    queue
                );
                return Ok(());
            }
            queue_state.consumer = Some(consumer.clone());
        }

        let queue_name = queue.to_string();
        let config = self.config.clone();
        let poll_state = state.clone();
        let handle = tokio::spawn(async move {
            let mut poll_interval =
                tokio::time::interval(Duration::from_millis(config.poll_interval_ms));
            loop {
                tokio::select! {
                    _ = poll_interval.tick() => {
                        if let Err(e) =
                            Self::poll_once(&poll_state, &consumer, config.poll_batch_limit).await
                        {
                            error!(
                                "Consumer for queue '{}' failed, batch restored: {}",
                                queue_name, e
                            );
                        }
                    }
                    changed = cancel.changed() => {
                        // 信号源被丢弃等同于取消
                        if changed.is_err() || *cancel.borrow() {
                            let mut queue_state = poll_state.lock().await;
                            queue_state.consumer = None;
                            info!("Consumer disconnected from queue '{}'", queue_name);
                            break;
                        }
                    }
                }
            }
        });
        state.lock().await.poller = Some(handle);

        info!("Installed standing consumer on queue '{}'", queue);
        Ok(())
    }

    async fn consume_messages_batch(
        &self,
        queue: &str,
        consumer: Arc<dyn MessageConsumer>,
        limit: usize,
    ) -> SchedulerResult<usize> {
        let state = self.queue_state(queue).await?;
        let consumed = Self::poll_once(&state, &consumer, limit).await?;
        if consumed > 0 {
            debug!("Consumed {} messages from queue '{}'", consumed, queue);
        }
        Ok(consumed)
    }

    async fn shutdown(&self) -> SchedulerResult<()> {
        let queues = self.queues.read().await;
        for (name, state) in queues.iter() {
            let mut queue_state = state.lock().await;
            if let Some(handle) = queue_state.poller.take() {
                handle.abort();
            }
            if queue_state.consumer.take().is_some() {
                debug!("Cleared consumer for queue '{}'", name);
            }
        }
        info!("In-memory message queue shut down");
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    use cronq_domain::Task;

    struct RecordingConsumer {
        received: Arc<StdMutex<Vec<Message>>>,
        fail: bool,
    }

    impl RecordingConsumer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                received: Arc::new(StdMutex::new(Vec::new())),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                received: Arc::new(StdMutex::new(Vec::new())),
                fail: true,
            })
        }

        fn received_ids(&self) -> Vec<String> {
            self.received
                .lock()
                .unwrap()
                .iter()
                .map(|m| m.id.clone())
                .collect()
        }
    }

    #[async_trait]
    impl MessageConsumer for RecordingConsumer {
        async fn consume(&self, messages: Vec<Message>) -> SchedulerResult<()> {
            if self.fail {
                return Err(SchedulerError::message_queue_error("consumer failed"));
            }
            self.received.lock().unwrap().extend(messages);
            Ok(())
        }
    }

    fn test_message() -> Message {
        Message::from_task(Task::new("default", "mail", json!({}), Utc::now()))
    }

    #[tokio::test]
    async fn test_batch_round_trip_preserves_order() {
        let queue = InMemoryMessageQueue::new();
        queue.register("jobs").await.unwrap();

        let first = test_message();
        let second = test_message();
        queue
            .add_messages("jobs", vec![first.clone(), second.clone()])
            .await
            .unwrap();

        let consumer = RecordingConsumer::new();
        let consumed = queue
            .consume_messages_batch("jobs", consumer.clone(), 10)
            .await
            .unwrap();

        assert_eq!(consumed, 2);
        assert_eq!(consumer.received_ids(), vec![first.id, second.id]);

        // 再次消费不会重复投递
        let consumed = queue
            .consume_messages_batch("jobs", consumer.clone(), 10)
            .await
            .unwrap();
        assert_eq!(consumed, 0);
        assert_eq!(consumer.received_ids().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_batch_restored_to_head() {
        let queue = InMemoryMessageQueue::new();
        queue.register("jobs").await.unwrap();

        let first = test_message();
        let second = test_message();
        queue
            .add_messages("jobs", vec![first.clone(), second.clone()])
            .await
            .unwrap();

        let failing = RecordingConsumer::failing();
        let result = queue.consume_messages_batch("jobs", failing, 10).await;
        assert!(result.is_err());

        // 批次按原顺序回到队首
        let consumer = RecordingConsumer::new();
        queue
            .consume_messages_batch("jobs", consumer.clone(), 10)
            .await
            .unwrap();
        assert_eq!(consumer.received_ids(), vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_unregistered_queue_rejected() {
        let queue = InMemoryMessageQueue::new();

        let result = queue.add_messages("missing", vec![test_message()]).await;
        assert!(matches!(result, Err(SchedulerError::QueueNotRegistered(_))));

        let consumer = RecordingConsumer::new();
        let result = queue.consume_messages_batch("missing", consumer, 10).await;
        assert!(matches!(result, Err(SchedulerError::QueueNotRegistered(_))));
    }

    #[tokio::test]
    async fn test_empty_add_is_noop() {
        let queue = InMemoryMessageQueue::new();
        // 未注册的队列也不报错：空列表根本不触发投递
        queue.add_messages("missing", vec![]).await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_consumer_polls_messages() {
        let queue = InMemoryMessageQueue::with_config(InMemoryQueueConfig {
            poll_interval_ms: 10,
            poll_batch_limit: 50,
        });
        queue.register("jobs").await.unwrap();

        let consumer = RecordingConsumer::new();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        queue
            .consume_messages_stream("jobs", consumer.clone(), cancel_rx)
            .await
            .unwrap();

        queue
            .add_messages("jobs", vec![test_message(), test_message()])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(consumer.received_ids().len(), 2);
        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_reregistration_is_ignored() {
        let queue = InMemoryMessageQueue::with_config(InMemoryQueueConfig {
            poll_interval_ms: 10,
            poll_batch_limit: 50,
        });
        queue.register("jobs").await.unwrap();

        let first = RecordingConsumer::new();
        let second = RecordingConsumer::new();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        queue
            .consume_messages_stream("jobs", first.clone(), cancel_rx.clone())
            .await
            .unwrap();
        queue
            .consume_messages_stream("jobs", second.clone(), cancel_rx)
            .await
            .unwrap();

        queue.add_messages("jobs", vec![test_message()]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(first.received_ids().len(), 1);
        assert!(second.received_ids().is_empty());
        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_disconnects_consumer() {
        let queue = InMemoryMessageQueue::with_config(InMemoryQueueConfig {
            poll_interval_ms: 10,
            poll_batch_limit: 50,
        });
        queue.register("jobs").await.unwrap();

        let consumer = RecordingConsumer::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        queue
            .consume_messages_stream("jobs", consumer.clone(), cancel_rx)
            .await
            .unwrap();

        cancel_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // 断连后消息不再被拉取
        queue.add_messages("jobs", vec![test_message()]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(consumer.received_ids().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let queue = InMemoryMessageQueue::new();
        queue.register("jobs").await.unwrap();

        queue.shutdown().await.unwrap();
        queue.shutdown().await.unwrap();
    }
}
