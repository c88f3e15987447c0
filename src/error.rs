use crate::gemini::ApiError;
use crate::key_pool::PoolExhausted;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 生成请求的失败分类。每一类都要让调用方能据此决定重试策略：
/// 限流与生成失败可稍后重试；池耗尽立即重试无意义；
/// 凭证失败时该 Key 已被隔离，重试大概率会换到别的 Key。
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("请求过于频繁")]
    RateLimited,

    #[error(transparent)]
    PoolExhausted(#[from] PoolExhausted),

    #[error("Key 鉴权失败: {0}")]
    BadCredential(#[source] ApiError),

    #[error("生成失败: {0}")]
    Generation(#[source] ApiError),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    details: &'a str,
}

pub fn error_response(status: StatusCode, error: &str, details: &str) -> Response {
    (status, Json(ErrorBody { error, details })).into_response()
}

impl IntoResponse for GenerateError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            Self::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests",
                "Please try again later",
            ),
            Self::PoolExhausted(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service configuration error",
                "API key issue",
            ),
            Self::BadCredential(_) => (
                StatusCode::BAD_GATEWAY,
                "Service configuration error",
                "Invalid API key",
            ),
            Self::Generation(_) => (
                StatusCode::BAD_GATEWAY,
                "AI generation error",
                "Failed to generate response",
            ),
        };
        error_response(status, error, details)
    }
}
