use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cronq_domain::{Message, MessageConsumer, MessageQueue};
use cronq_errors::{SchedulerError, SchedulerResult};

#[derive(Default)]
struct ImmediateState {
    consumer: Option<Arc<dyn MessageConsumer>>,
    pending: VecDeque<Message>,
    watcher: Option<JoinHandle<()>>,
}

/// 即时消息队列实现
///
/// `add_messages` 把消息同步交给已安装的消费者，投递错误直接返回
/// 给发布方；没有消费者时消息进入待投递缓冲区，由
/// `consume_messages_batch` 逐批领走。消费失败时缓冲区不推进。
pub struct ImmediateMessageQueue {
    queues: Arc<RwLock<HashMap<String, Arc<Mutex<ImmediateState>>>>>,
}

impl ImmediateMessageQueue {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn queue_state(&self, queue: &str) -> SchedulerResult<Arc<Mutex<ImmediateState>>> {
        self.queues
            .read()
            .await
            .get(queue)
            .cloned()
            .ok_or_else(|| SchedulerError::QueueNotRegistered(queue.to_string()))
    }

    /// 把缓冲区里的消息全部交给消费者；出错即停
    async fn drain_pending(
        state: &Arc<Mutex<ImmediateState>>,
        consumer: &Arc<dyn MessageConsumer>,
    ) -> SchedulerResult<usize> {
        let mut delivered = 0;
        loop {
            let batch: Vec<Message> = {
                let queue_state = state.lock().await;
                queue_state.pending.iter().cloned().collect()
            };
            if batch.is_empty() {
                return Ok(delivered);
            }
            consumer.consume(batch.clone()).await?;
            let mut queue_state = state.lock().await;
            let drain_count = batch.len().min(queue_state.pending.len());
            queue_state.pending.drain(..drain_count);
            delivered += batch.len();
        }
    }
}

impl Default for ImmediateMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for ImmediateMessageQueue {
    async fn register(&self, queue: &str) -> SchedulerResult<()> {
        let mut queues = self.queues.write().await;
        if queues.contains_key(queue) {
            debug!("Queue '{}' already registered", queue);
            return Ok(());
        }
        queues.insert(
            queue.to_string(),
            Arc::new(Mutex::new(ImmediateState::default())),
        );
        info!("Registered queue '{}'", queue);
        Ok(())
    }

    async fn add_messages(&self, queue: &str, messages: Vec<Message>) -> SchedulerResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let state = self.queue_state(queue).await?;

        let consumer = {
            let queue_state = state.lock().await;
            queue_state.consumer.clone()
        };
        match consumer {
            Some(consumer) => {
                // 同步直通：投递失败原样返回给发布方
                debug!(
                    "Handing {} messages on queue '{}' directly to consumer",
                    messages.len(),
                    queue
                );
                consumer.consume(messages).await
            }
            None => {
                let mut queue_state = state.lock().await;
                queue_state.pending.extend(messages);
                debug!(
                    "Buffered messages on queue '{}' (pending: {})",
                    queue,
                    queue_state.pending.len()
                );
                Ok(())
            }
        }
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

        // 安装时先清空积压，之后的投递直接穿透
        if let Err(e) = Self::drain_pending(&state, &consumer).await {
            warn!("Draining backlog for queue '{}' failed: {}", queue, e);
        }

        let queue_name = queue.to_string();
        let watch_state = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                let changed = cancel.changed().await;
                if changed.is_err() || *cancel.borrow() {
                    let mut queue_state = watch_state.lock().await;
                    queue_state.consumer = None;
                    info!("Consumer disconnected from queue '{}'", queue_name);
                    break;
                }
            }
        });
        state.lock().await.watcher = Some(handle);

        info!("Installed immediate consumer on queue '{}'", queue);
        Ok(())
    }

    async fn consume_messages_batch(
        &self,
        queue: &str,
        consumer: Arc<dyn MessageConsumer>,
        limit: usize,
    ) -> SchedulerResult<usize> {
        let state = self.queue_state(queue).await?;

        let batch: Vec<Message> = {
            let queue_state = state.lock().await;
            queue_state
                .pending
                .iter()
                .take(limit)
                .cloned()
                .collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }

        // 消费失败时不推进缓冲区
        consumer.consume(batch.clone()).await?;

        let mut queue_state = state.lock().await;
        let advance = batch.len().min(queue_state.pending.len());
        queue_state.pending.drain(..advance);
        debug!("Consumed {} messages from queue '{}'", advance, queue);
        Ok(advance)
    }

    async fn shutdown(&self) -> SchedulerResult<()> {
        let queues = self.queues.read().await;
        for (name, state) in queues.iter() {
            let mut queue_state = state.lock().await;
            if let Some(handle) = queue_state.watcher.take() {
                handle.abort();
            }
            if queue_state.consumer.take().is_some() {
                debug!("Cleared consumer for queue '{}'", name);
            }
        }
        info!("Immediate message queue shut down");
        Ok(())
    }

    fn name(&self) -> &str {
        "immediate"
    }
}
