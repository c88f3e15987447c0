use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// 单个 Gemini API Key 的用量状态。
///
/// identifier 是机密：对外（日志/统计）只暴露 masked 形式。
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub identifier: String,
    pub usage_count: u32,
    pub last_used_at: Instant,
    pub quarantined: bool,
    /// 该 Key 生成过的消息（有界，最旧的先淘汰）。
    pub message_history: Vec<String>,
}

impl KeyRecord {
    pub fn new(identifier: String, now: Instant) -> Self {
        Self {
            identifier,
            usage_count: 0,
            last_used_at: now,
            quarantined: false,
            message_history: Vec::new(),
        }
    }

    /// 记一次使用：用量 +1（封顶 ceiling），并刷新 last_used_at。
    pub fn record_use(&mut self, ceiling: u32, now: Instant) {
        self.usage_count = self.usage_count.saturating_add(1).min(ceiling);
        self.last_used_at = now;
    }

    /// 冷却窗口过后，每次被扫描到恢复 1 点用量（不清零、不刷新 last_used_at）。
    /// 返回是否发生了衰减。
    pub fn decay_if_cooled(&mut self, cooldown: Duration, ceiling: u32, now: Instant) -> bool {
        if now.duration_since(self.last_used_at) <= cooldown {
            return false;
        }
        self.usage_count = self.usage_count.saturating_sub(1);
        if self.quarantined && self.usage_count < ceiling {
            self.quarantined = false;
        }
        true
    }

    /// 隔离：用量直接置顶并刷新 last_used_at，直到冷却衰减才会重新进入轮换。
    pub fn quarantine(&mut self, ceiling: u32, now: Instant) {
        self.usage_count = ceiling;
        self.last_used_at = now;
        self.quarantined = true;
    }

    pub fn push_message(&mut self, message: String, cap: usize) {
        self.message_history.push(message);
        if self.message_history.len() > cap {
            let overflow = self.message_history.len() - cap;
            self.message_history.drain(..overflow);
        }
    }

    /// 脱敏标识，用于日志与统计接口。
    pub fn masked(&self) -> String {
        let id = self.identifier.as_str();
        if id.len() <= 8 {
            return "****".to_string();
        }
        match (id.get(..6), id.get(id.len() - 4..)) {
            (Some(head), Some(tail)) => format!("{head}…{tail}"),
            _ => "****".to_string(),
        }
    }

    pub fn snapshot(&self) -> KeySnapshot {
        KeySnapshot {
            key: self.masked(),
            usage_count: self.usage_count,
            quarantined: self.quarantined,
            history_len: self.message_history.len(),
        }
    }
}

/// 统计接口使用的 Key 视图（不含机密）。
#[derive(Debug, Clone, Serialize)]
pub struct KeySnapshot {
    pub key: String,
    pub usage_count: u32,
    pub quarantined: bool,
    pub history_len: usize,
}
