//! 带“热身门槛”的响应缓存。
//!
//! 这不是常规缓存：条目要被连续查到超过门槛次数才开始对外命中，
//! 之前的查询全部按未命中处理（迫使上游重新生成，保持前几次回答的新鲜感）；
//! 只有持续的重复请求才会收敛到稳定的缓存答案。store 无条件覆盖并把计数重置为 1。

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// 缓存键：主题 + 模式标志，两种模式的缓存空间彼此隔离。
pub fn fingerprint(subject: &str, deep_gaze: bool) -> String {
    format!("{subject}-{deep_gaze}")
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    created_at: Instant,
    hit_count: u32,
}

#[derive(Debug)]
pub struct MessageCache {
    ttl: Duration,
    gate_hits: u32,
    state: RwLock<HashMap<String, CacheEntry>>,
}

impl MessageCache {
    pub fn new(ttl: Duration, gate_hits: u32) -> Self {
        Self {
            ttl,
            gate_hits,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// 未过期的条目每次被查询都会自增计数（无论是否返回）；
    /// 只有查询前计数已超过门槛才返回存储值。过期条目一律按未命中处理，
    /// 清理交给 Housekeeper。
    pub async fn lookup(&self, fingerprint: &str) -> Option<String> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        let entry = state.get_mut(fingerprint)?;

        if now.duration_since(entry.created_at) > self.ttl {
            return None;
        }

        let warmed = entry.hit_count > self.gate_hits;
        entry.hit_count += 1;
        warmed.then(|| entry.value.clone())
    }

    /// 无条件覆盖：计数回到 1，created_at 回到现在。
    pub async fn store(&self, fingerprint: String, value: String) {
        let mut state = self.state.write().await;
        state.insert(
            fingerprint,
            CacheEntry {
                value,
                created_at: Instant::now(),
                hit_count: 1,
            },
        );
    }

    /// Housekeeper 调用：删除所有超过 TTL 的条目，返回删除数量。
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.write().await;
        let before = state.len();
        state.retain(|_, entry| now.duration_since(entry.created_at) <= self.ttl);
        before - state.len()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30 * 60);

    #[tokio::test(start_paused = true)]
    async fn gate_opens_on_the_sixth_lookup() {
        let cache = MessageCache::new(TTL, 5);
        cache.store(fingerprint("mug", false), "hello".to_string()).await;

        let fp = fingerprint("mug", false);
        for _ in 0..5 {
            assert_eq!(cache.lookup(&fp).await, None);
        }
        assert_eq!(cache.lookup(&fp).await.as_deref(), Some("hello"));
        // 命中后继续命中。
        assert_eq!(cache.lookup(&fp).await.as_deref(), Some("hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn store_resets_the_gate() {
        let cache = MessageCache::new(TTL, 5);
        let fp = fingerprint("mug", false);
        cache.store(fp.clone(), "v1".to_string()).await;
        for _ in 0..5 {
            cache.lookup(&fp).await;
        }
        assert_eq!(cache.lookup(&fp).await.as_deref(), Some("v1"));

        cache.store(fp.clone(), "v2".to_string()).await;

        // 覆盖把计数重置为 1：紧随其后的查询回到未命中。
        assert_eq!(cache.lookup(&fp).await, None);
        for _ in 0..4 {
            assert_eq!(cache.lookup(&fp).await, None);
        }
        assert_eq!(cache.lookup(&fp).await.as_deref(), Some("v2"));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_gate_serves_immediately_after_store() {
        let cache = MessageCache::new(TTL, 0);
        let fp = fingerprint("mug", true);
        cache.store(fp.clone(), "v".to_string()).await;
        assert_eq!(cache.lookup(&fp).await.as_deref(), Some("v"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_a_miss_regardless_of_warmup() {
        let cache = MessageCache::new(TTL, 0);
        let fp = fingerprint("mug", false);
        cache.store(fp.clone(), "v".to_string()).await;
        assert!(cache.lookup(&fp).await.is_some());

        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        assert_eq!(cache.lookup(&fp).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_expired_entries() {
        let cache = MessageCache::new(TTL, 5);
        cache.store("old-false".to_string(), "v1".to_string()).await;

        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        cache.store("new-false".to_string(), "v2".to_string()).await;

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn modes_occupy_disjoint_cache_space() {
        let cache = MessageCache::new(TTL, 0);
        cache.store(fingerprint("mug", false), "plain".to_string()).await;

        assert_eq!(cache.lookup(&fingerprint("mug", true)).await, None);
        assert_eq!(
            cache.lookup(&fingerprint("mug", false)).await.as_deref(),
            Some("plain")
        );
    }
}
