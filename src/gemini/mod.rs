//! Gemini 后端客户端：generateContent 的最小封装与错误分类。

mod client;
mod types;

pub use client::{ApiError, GeminiClient};
