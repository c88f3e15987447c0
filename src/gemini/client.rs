use crate::config::Config;
use crate::gemini::types::{
    Content, ErrorResponse, GenerateContentRequest, GenerateContentResponse, Part,
};
use crate::prompt::SamplingConfig;
use crate::service::TextProvider;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Gemini API 错误 {status}: {message}")]
    Http { status: u16, message: String },

    #[error("后端未返回候选文本")]
    NoCandidates,

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] sonic_rs::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 凭证类失败：401/403，或 400 且错误信息指向 API key 本身。
    /// 传输错误（含超时）一律不算：超时不应把 Key 打入隔离。
    pub fn is_credential_failure(&self) -> bool {
        match self {
            Self::Http {
                status: 401 | 403, ..
            } => true,
            Self::Http {
                status: 400,
                message,
            } => message.contains("API key"),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    model: String,
}

impl GeminiClient {
    pub fn new(cfg: &Config) -> Result<Self, anyhow::Error> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90));

        if cfg.timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(cfg.timeout_ms));
        }
        if !cfg.proxy.trim().is_empty() {
            builder = builder.proxy(reqwest::Proxy::all(cfg.proxy.trim())?);
        }

        Ok(Self {
            http: builder.build()?,
            model: cfg.gemini_model.clone(),
        })
    }

    fn generate_url(&self) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        )
    }

    /// 单次 generateContent 调用。Key 走请求头，不进 URL（避免出现在任何日志里）。
    pub async fn generate(
        &self,
        api_key: &str,
        prompt: &str,
        sampling: &SamplingConfig,
    ) -> Result<String, ApiError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: (*sampling).into(),
        };

        let resp = self
            .http
            .post(self.generate_url())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let bytes = resp.bytes().await?;

        if status >= 400 {
            return Err(ApiError::Http {
                status,
                message: parse_error_message(&bytes),
            });
        }

        let parsed: GenerateContentResponse = sonic_rs::from_slice(&bytes)?;
        extract_text(&parsed)
    }
}

impl TextProvider for GeminiClient {
    async fn invoke(
        &self,
        api_key: &str,
        prompt: &str,
        sampling: &SamplingConfig,
    ) -> Result<String, ApiError> {
        self.generate(api_key, prompt, sampling).await
    }
}

fn parse_error_message(bytes: &[u8]) -> String {
    match sonic_rs::from_slice::<ErrorResponse>(bytes) {
        Ok(ErrorResponse { error: Some(e) }) if !e.message.is_empty() => e.message,
        _ => String::from_utf8_lossy(bytes).trim().to_string(),
    }
}

/// 取第一个候选的全部文本段并拼接；没有可用文本时视为生成失败。
fn extract_text(resp: &GenerateContentResponse) -> Result<String, ApiError> {
    let text: String = resp
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|c| {
            c.parts
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(ApiError::NoCandidates);
    }
    Ok(text)
}
