use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::debug;

use cronq_domain::LockCache;
use cronq_errors::{SchedulerError, SchedulerResult};

/// Redis 锁缓存配置
#[derive(Debug, Clone)]
pub struct RedisLockCacheConfig {
    pub url: String,
    pub connection_timeout_seconds: u64,
}

impl Default for RedisLockCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            connection_timeout_seconds: 30,
        }
    }
}

/// Redis 锁缓存
///
/// 用 `SET key value NX EX ttl` 原语提供跨实例的原子抢占；
/// 连接由 ConnectionManager 维护并自动重连。
pub struct RedisLockCache {
    manager: ConnectionManager,
}

impl RedisLockCache {
    pub async fn new(config: RedisLockCacheConfig) -> SchedulerResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            SchedulerError::cache_error(format!("Failed to create Redis client: {e}"))
        })?;
        let manager = tokio::time::timeout(
            Duration::from_secs(config.connection_timeout_seconds),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| SchedulerError::cache_error("Redis connection timed out"))?
        .map_err(|e| SchedulerError::cache_error(format!("Failed to connect to Redis: {e}")))?;

        debug!("Connected to Redis lock cache");
        Ok(Self { manager })
    }
}

#[async_trait]
impl LockCache for RedisLockCache {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> SchedulerResult<bool> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::cache_error(format!("SET NX failed for '{key}': {e}")))?;
        Ok(reply.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> SchedulerResult<bool> {
        let mut conn = self.manager.clone();
        let renewed: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::cache_error(format!("EXPIRE failed for '{key}': {e}")))?;
        Ok(renewed == 1)
    }

    async fn delete(&self, key: &str) -> SchedulerResult<()> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::cache_error(format!("DEL failed for '{key}': {e}")))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> SchedulerResult<bool> {
        let mut conn = self.manager.clone();
        let found: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::cache_error(format!("EXISTS failed for '{key}': {e}")))?;
        Ok(found == 1)
    }
}
