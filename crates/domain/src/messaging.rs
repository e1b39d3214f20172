use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use cronq_errors::SchedulerResult;

use crate::entities::Message;

/// 消息消费者
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    async fn consume(&self, messages: Vec<Message>) -> SchedulerResult<()>;
}

/// 消息队列抽象接口
///
/// 所有实现共享同一生命周期契约：`register` 必须先于同一队列上的
/// 投递与消费调用，否则返回队列未注册错误。取消通过 watch 信号
/// 协作完成，只停止后续轮询，不打断进行中的批次。
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// 注册队列，重复注册为空操作
    async fn register(&self, queue: &str) -> SchedulerResult<()>;

    /// 投递一批消息；空列表为空操作
    async fn add_messages(&self, queue: &str, messages: Vec<Message>) -> SchedulerResult<()>;

    /// 安装常驻消费者
    ///
    /// 对同一队列幂等：已有消费者时记录告警但不重复安装。
    /// 收到取消信号后停止轮询、清除消费者并发出断连事件。
    async fn consume_messages_stream(
        &self,
        queue: &str,
        consumer: Arc<dyn MessageConsumer>,
        cancel: watch::Receiver<bool>,
    ) -> SchedulerResult<()>;

    /// 拉取至多 `limit` 条消息交给消费者，返回实际消费数量
    ///
    /// 消费者失败时实现方不得丢失该批消息：内存实现按原顺序
    /// 放回队首，即时实现不推进缓冲区。
    async fn consume_messages_batch(
        &self,
        queue: &str,
        consumer: Arc<dyn MessageConsumer>,
        limit: usize,
    ) -> SchedulerResult<usize>;

    /// 停止所有轮询并清除消费者注册，可安全地重复调用
    async fn shutdown(&self) -> SchedulerResult<()>;

    /// 实现名称
    fn name(&self) -> &str;
}
