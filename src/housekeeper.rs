//! 后台清扫任务：周期性删除过期缓存条目、修剪限流窗口。
//!
//! 显式持有 shutdown 通道，由 main 在退出时通知并 join，
//! 不做无人认领的 fire-and-forget 定时器。

use crate::message_cache::MessageCache;
use crate::rate_limit::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub fn spawn_sweep_task(
    cache: Arc<MessageCache>,
    limiter: Arc<RateLimiter>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // interval 的首个 tick 立即完成：吃掉它，首次清扫发生在一个周期之后。
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = cache.sweep().await;
                    let dropped = limiter.sweep().await;
                    if evicted > 0 || dropped > 0 {
                        tracing::debug!(
                            cache_evicted = evicted,
                            windows_dropped = dropped,
                            "后台清扫完成"
                        );
                    }
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        tracing::info!("后台清扫任务退出");
                        return;
                    }
                }
            }
        }
    })
}
