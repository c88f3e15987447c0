use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8046;
const DEFAULT_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

const DEFAULT_KEY_MAX_USES: u32 = 950;
const DEFAULT_KEY_COOLDOWN_MS: u64 = 60_000;
const DEFAULT_RATE_LIMIT_MAX: usize = 300;
const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 60_000;
const DEFAULT_CACHE_TTL_MS: u64 = 30 * 60 * 1000;
const DEFAULT_CACHE_GATE_HITS: u32 = 5;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 5 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub gemini_api_keys: Vec<String>,
    pub gemini_model: String,
    pub timeout_ms: u64,
    pub proxy: String,

    pub key_max_uses: u32,
    pub key_cooldown_ms: u64,
    pub rate_limit_max: usize,
    pub rate_limit_window_ms: u64,
    pub cache_ttl_ms: u64,
    pub cache_gate_hits: u32,
    pub sweep_interval_ms: u64,

    pub debug: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawEnv {
    #[serde(alias = "HOST")]
    host: Option<String>,
    #[serde(alias = "PORT")]
    port: Option<u16>,

    #[serde(alias = "GEMINI_API_KEYS")]
    gemini_api_keys: Option<String>,
    #[serde(alias = "GEMINI_MODEL")]
    gemini_model: Option<String>,
    #[serde(alias = "TIMEOUT")]
    timeout: Option<u64>,
    #[serde(alias = "PROXY")]
    proxy: Option<String>,

    #[serde(alias = "KEY_MAX_USES")]
    key_max_uses: Option<u32>,
    #[serde(alias = "KEY_COOLDOWN_MS")]
    key_cooldown_ms: Option<u64>,
    #[serde(alias = "RATE_LIMIT_MAX")]
    rate_limit_max: Option<usize>,
    #[serde(alias = "RATE_LIMIT_WINDOW_MS")]
    rate_limit_window_ms: Option<u64>,
    #[serde(alias = "CACHE_TTL_MS")]
    cache_ttl_ms: Option<u64>,
    #[serde(alias = "CACHE_GATE_HITS")]
    cache_gate_hits: Option<u32>,
    #[serde(alias = "SWEEP_INTERVAL_MS")]
    sweep_interval_ms: Option<u64>,

    #[serde(alias = "DEBUG")]
    debug: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        load_dotenv();

        let raw = Figment::from(Env::raw())
            .extract::<RawEnv>()
            .unwrap_or_default();

        Self {
            host: raw.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: raw.port.unwrap_or(DEFAULT_PORT),
            gemini_api_keys: parse_key_list(raw.gemini_api_keys.as_deref()),
            gemini_model: raw.gemini_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout_ms: raw.timeout.unwrap_or(DEFAULT_TIMEOUT_MS),
            proxy: raw.proxy.unwrap_or_default(),
            key_max_uses: raw.key_max_uses.unwrap_or(DEFAULT_KEY_MAX_USES),
            key_cooldown_ms: raw.key_cooldown_ms.unwrap_or(DEFAULT_KEY_COOLDOWN_MS),
            rate_limit_max: raw.rate_limit_max.unwrap_or(DEFAULT_RATE_LIMIT_MAX),
            rate_limit_window_ms: raw
                .rate_limit_window_ms
                .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_MS),
            cache_ttl_ms: raw.cache_ttl_ms.unwrap_or(DEFAULT_CACHE_TTL_MS),
            cache_gate_hits: raw.cache_gate_hits.unwrap_or(DEFAULT_CACHE_GATE_HITS),
            sweep_interval_ms: raw.sweep_interval_ms.unwrap_or(DEFAULT_SWEEP_INTERVAL_MS),
            debug: raw.debug.unwrap_or_default(),
        }
    }

    /// Key 列表为空时必须拒绝启动，而不是带病运行。
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.gemini_api_keys.is_empty(),
            "未配置 GEMINI_API_KEYS（逗号分隔的 Key 列表）"
        );
        Ok(())
    }

    pub fn key_cooldown(&self) -> Duration {
        Duration::from_millis(self.key_cooldown_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn parse_key_list(value: Option<&str>) -> Vec<String> {
    let Some(value) = value else {
        return Vec::new();
    };
    value
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

fn load_dotenv() {
    let Some(path) = find_dotenv_path() else {
        return;
    };
    let Ok(content) = std::fs::read_to_string(&path) else {
        return;
    };

    for line in content.lines() {
        let Some((key, value)) = parse_dotenv_line(line) else {
            continue;
        };
        // Rust 2024：修改进程环境变量在并发场景下可能触发 UB，因此 API 为 unsafe。
        // 这里在启动阶段加载 .env，且未并发访问环境变量，符合使用前提。
        unsafe {
            std::env::set_var(key, value);
        }
    }
}

fn find_dotenv_path() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let candidate = cwd.join(".env");
    candidate.is_file().then_some(candidate)
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let mut line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some(rest) = line.strip_prefix("export ") {
        line = rest.trim_start();
    }

    let eq_idx = line.find('=')?;
    if eq_idx == 0 {
        return None;
    }

    let key = line[..eq_idx].trim();
    if key.is_empty() {
        return None;
    }

    let raw = line[eq_idx + 1..].trim();
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return Some((key.to_string(), raw[1..raw.len() - 1].to_string()));
        }
    }

    Some((key.to_string(), strip_inline_comment(raw).trim().to_string()))
}

fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] != b'#' {
            continue;
        }
        if i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t' {
            return value[..i].trim_end();
        }
    }
    value
}
