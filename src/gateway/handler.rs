use crate::error::error_response;
use crate::gemini::GeminiClient;
use crate::key_pool::KeySnapshot;
use crate::prompt::GazeMode;
use crate::service::MessageService;
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type Service = MessageService<GeminiClient>;

pub struct GatewayState {
    pub service: Service,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub object: String,
    #[serde(rename = "isDeepGaze", default)]
    pub is_deep_gaze: bool,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub message: String,
}

pub async fn handle_generate(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(req): Json<GenerateRequest>,
) -> Response {
    let client = client_ip(&headers);

    let subject = req.object.trim();
    if subject.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid request", "object is required");
    }

    let mode = GazeMode::from_deep_flag(req.is_deep_gaze);
    match state.service.handle(&client, subject, mode).await {
        Ok(message) => (StatusCode::OK, Json(GenerateResponse { message })).into_response(),
        Err(e) => {
            tracing::warn!(error = ?e, client = %client, subject = %subject, "生成请求失败");
            e.into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    keys: Vec<KeySnapshot>,
    cache_entries: usize,
    tracked_clients: usize,
    started_at: DateTime<Utc>,
    uptime_secs: i64,
}

/// 运行状态快照：Key 只以脱敏形式出现。
pub async fn handle_stats(State(state): State<Arc<GatewayState>>) -> Response {
    let resp = StatsResponse {
        keys: state.service.pool().snapshot().await,
        cache_entries: state.service.cache().len().await,
        tracked_clients: state.service.limiter().tracked_clients().await,
        started_at: state.started_at,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    };
    (StatusCode::OK, Json(resp)).into_response()
}

/// 客户端标识：x-forwarded-for 的第一个地址，缺失时归入 "unknown"。
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_takes_first_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4, 5.6.7.8".parse().unwrap());
        assert_eq!(client_ip(&headers), "1.2.3.4");
    }

    #[test]
    fn client_ip_falls_back_to_unknown() {
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "  ".parse().unwrap());
        assert_eq!(client_ip(&headers), "unknown");
    }

    #[test]
    fn generate_request_defaults_deep_gaze_to_false() {
        let req: GenerateRequest = serde_json::from_str(r#"{"object":"mug"}"#).unwrap();
        assert_eq!(req.object, "mug");
        assert!(!req.is_deep_gaze);

        let req: GenerateRequest =
            serde_json::from_str(r#"{"object":"mug","isDeepGaze":true}"#).unwrap();
        assert!(req.is_deep_gaze);
    }
}
