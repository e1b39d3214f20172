use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use cronq_domain::LockCache;
use cronq_errors::SchedulerResult;

/// 任务锁配置
#[derive(Debug, Clone)]
pub struct TaskLockConfig {
    /// 锁的 TTL（秒）；持有者崩溃后由 TTL 过期兜底释放
    pub ttl_seconds: u64,
    /// 键前缀
    pub key_prefix: String,
}

impl Default for TaskLockConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 60,
            key_prefix: "task-lock".to_string(),
        }
    }
}

/// 分布式任务锁
///
/// 基于共享 KV 的 set-if-absent + TTL 原语做尽力而为的互斥。
/// 抢锁失败不是错误：它表示任务由其他实例持有，调用方应当跳过。
/// 互斥是 TTL 级别的（至少一次投递），不是事务级别的。
pub struct TaskLockService {
    cache: Arc<dyn LockCache>,
    config: TaskLockConfig,
    owner: String,
}

impl TaskLockService {
    pub fn new(cache: Arc<dyn LockCache>, config: TaskLockConfig) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown-host".to_string());
        let owner = format!("{}:{}", host, &Uuid::new_v4().to_string()[..8]);
        Self {
            cache,
            config,
            owner,
        }
    }

    /// 锁值中记录的持有者身份
    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_seconds)
    }

    /// 尝试抢占锁，false 表示已被其他实例持有
    pub async fn acquire(&self, key: &str) -> SchedulerResult<bool> {
        let acquired = self
            .cache
            .set_if_absent(&self.full_key(key), &self.owner, self.ttl())
            .await?;
        if !acquired {
            debug!("锁 {} 已被其他实例持有，跳过", key);
        }
        Ok(acquired)
    }

    /// 为仍在处理中的条目续约
    pub async fn renew(&self, key: &str) -> SchedulerResult<bool> {
        self.cache.expire(&self.full_key(key), self.ttl()).await
    }

    pub async fn release(&self, key: &str) -> SchedulerResult<()> {
        self.cache.delete(&self.full_key(key)).await
    }

    /// 过滤掉当前已被锁定的条目
    ///
    /// `key_fn` 返回 None 的条目无法被锁定，原样保留。
    pub async fn filter_locked<T, F>(&self, items: Vec<T>, key_fn: F) -> SchedulerResult<Vec<T>>
    where
        F: Fn(&T) -> Option<String>,
    {
        let mut free = Vec::with_capacity(items.len());
        for item in items {
            match key_fn(&item) {
                Some(key) => {
                    if !self.cache.exists(&self.full_key(&key)).await? {
                        free.push(item);
                    }
                }
                None => free.push(item),
            }
        }
        Ok(free)
    }
}
