use crate::key_pool::types::{KeyRecord, KeySnapshot};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// 单个 Key 保留的消息历史上限。
const MAX_HISTORY: usize = 1000;

#[derive(Debug, Error)]
#[error("所有 Key 均已达到用量上限")]
pub struct PoolExhausted;

/// Key 池：持有全部 Gemini API Key 及其用量/冷却状态，按轮询 + 冷却衰减选择。
///
/// 整个池由一把写锁串行化：并发 select 不会把同一个接近上限的 Key 推过上限。
#[derive(Debug)]
pub struct KeyPool {
    max_uses: u32,
    cooldown: Duration,
    state: RwLock<State>,
}

#[derive(Debug)]
struct State {
    keys: Vec<KeyRecord>,
    current_index: usize,
}

impl KeyPool {
    pub fn new(identifiers: Vec<String>, max_uses: u32, cooldown: Duration) -> Self {
        let now = Instant::now();
        let keys = identifiers
            .into_iter()
            .map(|id| KeyRecord::new(id, now))
            .collect();
        Self {
            max_uses,
            cooldown,
            state: RwLock::new(State {
                keys,
                current_index: 0,
            }),
        }
    }

    /// 从游标位置起最多扫描一整圈：
    /// 1. 候选 Key 若已过冷却窗口，先恢复 1 点用量（缓慢回血，而非清零）；
    /// 2. 用量低于上限即选中：记一次使用并把游标推过它。
    /// 一圈内没有可用 Key 时返回 PoolExhausted。
    pub async fn select(&self) -> Result<String, PoolExhausted> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        let len = state.keys.len();
        if len == 0 {
            return Err(PoolExhausted);
        }

        let mut idx = state.current_index;
        for _ in 0..len {
            let key = &mut state.keys[idx];
            key.decay_if_cooled(self.cooldown, self.max_uses, now);

            if key.usage_count < self.max_uses {
                key.record_use(self.max_uses, now);
                let identifier = key.identifier.clone();
                state.current_index = (idx + 1) % len;
                return Ok(identifier);
            }
            idx = (idx + 1) % len;
        }

        Err(PoolExhausted)
    }

    /// 隔离指定 Key：用量置顶 + 刷新 last_used_at，冷却衰减前不再进入轮换。
    /// 由编排层在后端返回鉴权类失败时调用。
    pub async fn quarantine(&self, identifier: &str) {
        let now = Instant::now();
        let mut state = self.state.write().await;
        for key in &mut state.keys {
            if key.identifier == identifier {
                key.quarantine(self.max_uses, now);
                tracing::warn!(key = %key.masked(), "Key 已隔离，等待冷却衰减恢复");
                return;
            }
        }
    }

    /// 把一条成功生成的消息记入对应 Key 的历史（有界）。
    pub async fn record_message(&self, identifier: &str, message: &str) {
        let mut state = self.state.write().await;
        for key in &mut state.keys {
            if key.identifier == identifier {
                key.push_message(message.to_string(), MAX_HISTORY);
                return;
            }
        }
    }

    pub async fn snapshot(&self) -> Vec<KeySnapshot> {
        let state = self.state.read().await;
        state.keys.iter().map(KeyRecord::snapshot).collect()
    }
}
