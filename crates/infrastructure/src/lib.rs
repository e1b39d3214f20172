//! 基础设施层
//!
//! 消息队列的两个参考实现（内存轮询、即时投递）、锁缓存后端
//! （内存、Redis）以及嵌入式部署用的内存任务存储。

pub mod immediate_queue;
pub mod in_memory_queue;
pub mod memory_cache;
pub mod memory_store;
pub mod redis_cache;

pub use immediate_queue::ImmediateMessageQueue;
pub use in_memory_queue::{InMemoryMessageQueue, InMemoryQueueConfig};
pub use memory_cache::MemoryLockCache;
pub use memory_store::MemoryTaskStore;
pub use redis_cache::{RedisLockCache, RedisLockCacheConfig};
