//! 按客户端的滑动窗口限流。
//!
//! 只有被放行的请求才计入窗口：被拒绝的请求不记录时间戳，
//! 贴着阈值震荡的客户端不会被自己的拒绝进一步惩罚。

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    state: RwLock<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// 返回 false 表示该客户端在窗口内的请求数已达上限，调用方必须拒绝。
    /// 放行时记录当前时间戳。
    pub async fn admit(&self, client_id: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.write().await;
        let window = state.entry(client_id.to_string()).or_default();

        // 读取路径上先剪掉窗口外的时间戳，保证窗口内不残留过期条目。
        while let Some(front) = window.front() {
            if now.duration_since(*front) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.max_requests {
            return false;
        }

        window.push_back(now);
        true
    }

    /// Housekeeper 调用：剪掉所有窗口的过期时间戳，清空的条目整体删除。
    /// 返回删除的客户端条目数。
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.write().await;
        let before = state.len();
        state.retain(|_, window| {
            while let Some(front) = window.front() {
                if now.duration_since(*front) >= self.window {
                    window.pop_front();
                } else {
                    break;
                }
            }
            !window.is_empty()
        });
        before - state.len()
    }

    pub async fn tracked_clients(&self) -> usize {
        self.state.read().await.len()
    }
}
