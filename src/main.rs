// === Jemalloc 全局分配器配置（用于内存分析）===
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub mod config;
pub mod error;
pub mod gateway;
pub mod gemini;
pub mod housekeeper;
pub mod key_pool;
pub mod message_cache;
pub mod prompt;
pub mod rate_limit;
pub mod service;
pub mod util;

use anyhow::Context;
use axum::Router;
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::load();

    init_tracing(&cfg);

    // 加载不到任何 Key 时直接拒绝启动。
    cfg.validate().context("配置校验失败")?;

    tracing::info!(
        keys = cfg.gemini_api_keys.len(),
        model = %cfg.gemini_model,
        "初始化 Gemini Key 池"
    );

    let gemini = gemini::GeminiClient::new(&cfg).context("初始化 GeminiClient 失败")?;
    let service = service::MessageService::from_config(&cfg, gemini);

    // 后台清扫：显式持有 shutdown 通道，退出时通知并 join。
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = housekeeper::spawn_sweep_task(
        service.cache().clone(),
        service.limiter().clone(),
        cfg.sweep_interval(),
        shutdown_rx,
    );

    let state = Arc::new(gateway::GatewayState {
        service,
        started_at: chrono::Utc::now(),
    });

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/debug/pprof/heap", get(handle_pprof_heap))
        .route("/api/generate-message", post(gateway::handle_generate))
        .route("/api/stats", get(gateway::handle_stats))
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));

    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("绑定监听端口失败")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务异常退出")?;

    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;

    Ok(())
}

async fn handle_health() -> &'static str {
    "ok"
}

fn init_tracing(cfg: &config::Config) {
    // DEBUG=off 完全静默；否则依赖库压到 warn，本项目自身日志至少 info，
    // 以免环境里预设的 RUST_LOG=warn 把关键日志过滤掉。
    let debug = cfg.debug.trim().to_lowercase();
    let filter = if debug == "off" {
        EnvFilter::new("off")
    } else {
        let env = std::env::var("RUST_LOG").unwrap_or_default();
        let env = env.trim();
        if env.is_empty() {
            EnvFilter::new("warn,objwhisper=info")
        } else if env.contains("objwhisper") {
            EnvFilter::new(env)
        } else {
            EnvFilter::new(format!("{env},objwhisper=info"))
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("收到退出信号，准备关闭服务...");
}

/// 导出 jemalloc 堆内存分析数据（pprof 格式）
/// 使用方式：
/// 1. curl http://localhost:PORT/debug/pprof/heap > heap.pb.gz
/// 2. go tool pprof -http=:8080 heap.pb.gz
#[cfg(not(target_env = "msvc"))]
async fn handle_pprof_heap() -> impl axum::response::IntoResponse {
    use axum::http::{StatusCode, header};
    use axum::response::Response;

    match jemalloc_pprof::PROF_CTL.as_ref() {
        Some(prof_ctl) => {
            let mut prof = prof_ctl.lock().await;
            match prof.dump_pprof() {
                Ok(pprof_data) => Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "application/octet-stream")
                    .header(
                        header::CONTENT_DISPOSITION,
                        "attachment; filename=\"heap.pb.gz\"",
                    )
                    .body(axum::body::Body::from(pprof_data))
                    .unwrap(),
                Err(e) => Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(axum::body::Body::from(format!("Failed to dump pprof: {e}")))
                    .unwrap(),
            }
        }
        None => Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .body(axum::body::Body::from(
                "jemalloc profiling not enabled. Set MALLOC_CONF=prof:true before starting.",
            ))
            .unwrap(),
    }
}

#[cfg(target_env = "msvc")]
async fn handle_pprof_heap() -> &'static str {
    "jemalloc profiling is not supported on MSVC targets"
}
