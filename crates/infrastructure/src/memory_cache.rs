use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use cronq_domain::LockCache;
use cronq_errors::SchedulerResult;

/// 内存锁缓存
///
/// 单进程内的 set-if-absent + TTL 实现，供嵌入式部署与测试使用。
/// 过期条目在下一次写路径访问时惰性清除。
pub struct MemoryLockCache {
    entries: Arc<RwLock<HashMap<String, (String, Instant)>>>,
}

impl MemoryLockCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryLockCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockCache for MemoryLockCache {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> SchedulerResult<bool> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        if let Some((_, expires_at)) = entries.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
            entries.remove(key);
        }
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> SchedulerResult<bool> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        match entries.get_mut(key) {
            Some((_, expires_at)) if *expires_at > now => {
                *expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> SchedulerResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> SchedulerResult<bool> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .map(|(_, expires_at)| *expires_at > Instant::now())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_if_absent_is_exclusive() {
        let cache = MemoryLockCache::new();
        let ttl = Duration::from_secs(10);

        assert!(cache.set_if_absent("a", "owner-1", ttl).await.unwrap());
        assert!(!cache.set_if_absent("a", "owner-2", ttl).await.unwrap());
        assert!(cache.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_key_can_be_reacquired() {
        let cache = MemoryLockCache::new();
        let ttl = Duration::from_millis(20);

        assert!(cache.set_if_absent("a", "owner-1", ttl).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(!cache.exists("a").await.unwrap());
        assert!(cache.set_if_absent("a", "owner-2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expire_renews_only_live_keys() {
        let cache = MemoryLockCache::new();
        let ttl = Duration::from_millis(50);

        assert!(cache.set_if_absent("a", "owner-1", ttl).await.unwrap());
        assert!(cache.expire("a", Duration::from_secs(10)).await.unwrap());
        assert!(!cache.expire("missing", ttl).await.unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;
        // 续约过的键仍然存活
        assert!(cache.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_releases_key() {
        let cache = MemoryLockCache::new();
        let ttl = Duration::from_secs(10);

        cache.set_if_absent("a", "owner-1", ttl).await.unwrap();
        cache.delete("a").await.unwrap();
        assert!(!cache.exists("a").await.unwrap());
        assert!(cache.set_if_absent("a", "owner-2", ttl).await.unwrap());
    }
}
