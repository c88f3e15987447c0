//! Key 池模块。
//!
//! 维护共享的 Gemini API Key 轮换：每个 Key 有硬性用量上限，冷却窗口过后
//! 按“每次扫描恢复 1 点”的节奏缓慢回血；鉴权失败的 Key 被整体隔离一个冷却周期。

mod pool;
mod types;

pub use pool::{KeyPool, PoolExhausted};
pub use types::KeySnapshot;
