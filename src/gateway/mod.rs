//! HTTP 网关：对外只有一个生成接口和一个运行状态快照。

mod handler;

pub use handler::{GatewayState, Service, handle_generate, handle_stats};
