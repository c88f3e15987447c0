//! 请求编排：限流检查 → 缓存查询 → 选 Key → 生成 → 缓存回填 / 隔离。

use crate::config::Config;
use crate::error::GenerateError;
use crate::gemini::ApiError;
use crate::key_pool::KeyPool;
use crate::message_cache::{self, MessageCache};
use crate::prompt::{self, GazeMode, SamplingConfig};
use crate::rate_limit::RateLimiter;
use std::future::Future;
use std::sync::Arc;

/// 上游文本生成的接缝：真实实现是 GeminiClient，测试里用桩替换。
pub trait TextProvider: Send + Sync {
    fn invoke(
        &self,
        api_key: &str,
        prompt: &str,
        sampling: &SamplingConfig,
    ) -> impl Future<Output = Result<String, ApiError>> + Send;
}

/// 服务对象：进程内唯一持有全部共享状态（池、缓存、限流窗口），
/// 在启动时构造一次，经句柄传给请求处理与后台清扫。
pub struct MessageService<P> {
    limiter: Arc<RateLimiter>,
    cache: Arc<MessageCache>,
    pool: Arc<KeyPool>,
    provider: P,
}

impl<P: TextProvider> MessageService<P> {
    pub fn new(
        limiter: Arc<RateLimiter>,
        cache: Arc<MessageCache>,
        pool: Arc<KeyPool>,
        provider: P,
    ) -> Self {
        Self {
            limiter,
            cache,
            pool,
            provider,
        }
    }

    pub fn from_config(cfg: &Config, provider: P) -> Self {
        Self::new(
            Arc::new(RateLimiter::new(cfg.rate_limit_max, cfg.rate_limit_window())),
            Arc::new(MessageCache::new(cfg.cache_ttl(), cfg.cache_gate_hits)),
            Arc::new(KeyPool::new(
                cfg.gemini_api_keys.clone(),
                cfg.key_max_uses,
                cfg.key_cooldown(),
            )),
            provider,
        )
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<MessageCache> {
        &self.cache
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    /// 处理一次生成请求。
    ///
    /// 缓存命中直接返回，不消耗 Key；
    /// 凭证类失败把当前 Key 整体隔离一个冷却周期后上抛；
    /// 其他生成失败不动任何状态。
    pub async fn handle(
        &self,
        client_id: &str,
        subject: &str,
        mode: GazeMode,
    ) -> Result<String, GenerateError> {
        if !self.limiter.admit(client_id).await {
            tracing::info!(client = %client_id, "客户端触发限流");
            return Err(GenerateError::RateLimited);
        }

        let fingerprint = message_cache::fingerprint(subject, mode.is_deep());
        if let Some(text) = self.cache.lookup(&fingerprint).await {
            tracing::debug!(subject = %subject, "缓存命中，跳过生成");
            return Ok(text);
        }

        let api_key = self.pool.select().await?;

        let (prompt_text, sampling) = prompt::build(mode, subject);
        match self.provider.invoke(&api_key, &prompt_text, &sampling).await {
            Ok(text) => {
                self.cache.store(fingerprint, text.clone()).await;
                self.pool.record_message(&api_key, &text).await;
                Ok(text)
            }
            Err(e) if e.is_credential_failure() => {
                // 一次鉴权失败就让该 Key 退出轮换一个冷却周期。
                self.pool.quarantine(&api_key).await;
                Err(GenerateError::BadCredential(e))
            }
            Err(e) => {
                tracing::warn!(status = ?e.status(), error = %e, "上游生成失败");
                Err(GenerateError::Generation(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct FakeProvider {
        calls: Arc<AtomicUsize>,
        bad_keys: Arc<HashSet<String>>,
        fail_generation: bool,
    }

    impl FakeProvider {
        fn with_bad_keys(keys: &[&str]) -> Self {
            Self {
                bad_keys: Arc::new(keys.iter().map(|s| s.to_string()).collect()),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TextProvider for FakeProvider {
        async fn invoke(
            &self,
            api_key: &str,
            _prompt: &str,
            _sampling: &SamplingConfig,
        ) -> Result<String, ApiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.bad_keys.contains(api_key) {
                return Err(ApiError::Http {
                    status: 403,
                    message: "API key not valid".to_string(),
                });
            }
            if self.fail_generation {
                return Err(ApiError::Http {
                    status: 500,
                    message: "backend unavailable".to_string(),
                });
            }
            Ok(format!("msg-{n}"))
        }
    }

    fn service(
        keys: &[&str],
        max_uses: u32,
        gate_hits: u32,
        rate_max: usize,
        provider: FakeProvider,
    ) -> MessageService<FakeProvider> {
        MessageService::new(
            Arc::new(RateLimiter::new(rate_max, Duration::from_secs(60))),
            Arc::new(MessageCache::new(Duration::from_secs(1800), gate_hits)),
            Arc::new(KeyPool::new(
                keys.iter().map(|s| s.to_string()).collect(),
                max_uses,
                Duration::from_secs(60),
            )),
            provider,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_requests_regenerate_while_store_resets_the_gate() {
        let provider = FakeProvider::default();
        let svc = service(&["k1"], 950, 5, 300, provider.clone());

        // 每次未命中都会重新生成并覆盖缓存，覆盖又把热身计数打回起点：
        // 顺序请求始终走上游（与并发突发下才会收敛的门控策略一致）。
        for i in 1..=6 {
            let text = svc.handle("c1", "mug", GazeMode::Simple).await.unwrap();
            assert_eq!(text, format!("msg-{i}"));
        }
        assert_eq!(provider.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn warm_cache_hit_skips_provider_and_pool() {
        let provider = FakeProvider::default();
        let svc = service(&["k1"], 950, 0, 300, provider.clone());

        let first = svc.handle("c1", "mug", GazeMode::Simple).await.unwrap();
        let second = svc.handle("c1", "mug", GazeMode::Simple).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.calls(), 1);
        // 命中不消耗 Key 用量。
        assert_eq!(svc.pool().snapshot().await[0].usage_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn modes_do_not_share_cache_entries() {
        let provider = FakeProvider::default();
        let svc = service(&["k1"], 950, 0, 300, provider.clone());

        let simple = svc.handle("c1", "mug", GazeMode::Simple).await.unwrap();
        let deep = svc.handle("c1", "mug", GazeMode::Deep).await.unwrap();

        assert_ne!(simple, deep);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn credential_failure_quarantines_and_rotates_to_next_key() {
        let provider = FakeProvider::with_bad_keys(&["k1"]);
        let svc = service(&["k1", "k2"], 950, 5, 300, provider.clone());

        let err = svc.handle("c1", "mug", GazeMode::Simple).await.unwrap_err();
        assert!(matches!(err, GenerateError::BadCredential(_)));

        let snap = svc.pool().snapshot().await;
        assert!(snap[0].quarantined);

        // 下一次请求换到另一个 Key 并成功。
        let text = svc.handle("c1", "vase", GazeMode::Simple).await.unwrap();
        assert_eq!(text, "msg-2");
        assert!(!svc.pool().snapshot().await[1].quarantined);
    }

    #[tokio::test(start_paused = true)]
    async fn generation_failure_mutates_nothing() {
        let provider = FakeProvider {
            fail_generation: true,
            ..FakeProvider::default()
        };
        let svc = service(&["k1"], 950, 5, 300, provider.clone());

        let err = svc.handle("c1", "mug", GazeMode::Simple).await.unwrap_err();
        assert!(matches!(err, GenerateError::Generation(_)));

        let snap = svc.pool().snapshot().await;
        assert!(!snap[0].quarantined);
        assert_eq!(svc.cache().len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_surfaces_as_pool_exhausted() {
        let provider = FakeProvider::default();
        let svc = service(&["k1"], 1, 5, 300, provider.clone());

        svc.handle("c1", "mug", GazeMode::Simple).await.unwrap();

        let err = svc.handle("c1", "vase", GazeMode::Simple).await.unwrap_err();
        assert!(matches!(err, GenerateError::PoolExhausted(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn over_cap_client_is_rate_limited() {
        let provider = FakeProvider::default();
        let svc = service(&["k1"], 950, 5, 2, provider.clone());

        svc.handle("c1", "mug", GazeMode::Simple).await.unwrap();
        svc.handle("c1", "vase", GazeMode::Simple).await.unwrap();

        let err = svc.handle("c1", "lamp", GazeMode::Simple).await.unwrap_err();
        assert!(matches!(err, GenerateError::RateLimited));
        assert_eq!(provider.calls(), 2);
    }
}
