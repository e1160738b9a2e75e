//! Environment Configuration
//!
//! Every knob arrives via environment variables; there are no config files.
//! Each key has a default except the endpoints, which are required. Values
//! are range-checked at startup and a violation fails the boot, because a
//! service that starts with a nonsense timeout is worse than one that
//! refuses to.
//!
//! | key | default | constraint |
//! |-----|---------|------------|
//! | `log_format` | `text` | `text` or `json` |
//! | `log_level` | `info` | `debug`/`info`/`warn`/`error` |
//! | `http_host` | (none) | required, IP or FQDN |
//! | `http_port` | (none) | required, 1025-65535 |
//! | `http_read_timeout` | `100ms` | 100ms-1s |
//! | `http_write_timeout` | `100ms` | 100ms-1s |
//! | `http_idle_timeout` | `100ms` | 100ms-1s |
//! | `http_shutdown_timeout` | `10s` | 100ms-30s |
//! | `otel_endpoint` | (none) | required URL |
//! | `otel_shutdown_timeout` | `500ms` | 100ms-30s |
//! | `rate_limiter_max_conn` | `100` | 1-100000 |
//! | `rate_limiter_max_wait` | `100` | 1-100000 |
//! | `rate_limiter_retry_after` | `1` | 1-60 |
//! | `backend_client_endpoint` | (none) | API tier only; required URL |
//! | `backend_client_request_timeout` | `200ms` | 100ms-1s |


use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};

use crate::admission::AdmissionParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow!("unknown log format {:?}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConf {
    pub format: LogFormat,
    pub level: String,
}

#[derive(Debug, Clone)]
pub struct HttpConf {
    pub host: String,
    pub port: u16,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl HttpConf {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterConf {
    pub max_conn: i64,
    pub max_wait: i64,
    pub retry_after_secs: i64,
}

impl RateLimiterConf {
    pub fn admission_params(&self) -> AdmissionParams {
        AdmissionParams {
            max_running: self.max_conn,
            max_waiting: self.max_wait,
            retry_after_secs: self.retry_after_secs,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OtelConf {
    pub endpoint: String,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BackendClientConf {
    pub endpoint: String,
    pub request_timeout: Duration,
}

/// Backend tier configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub log: LoggingConf,
    pub http: HttpConf,
    pub rate_limiter: RateLimiterConf,
    pub otel: OtelConf,
}

/// API tier configuration: the backend tier's set plus the upstream client.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub log: LoggingConf,
    pub http: HttpConf,
    pub rate_limiter: RateLimiterConf,
    pub otel: OtelConf,
    pub backend_client: BackendClientConf,
}

pub fn load_backend_config() -> anyhow::Result<BackendConfig> {
    Ok(BackendConfig {
        log: load_logging()?,
        http: load_http()?,
        rate_limiter: load_rate_limiter()?,
        otel: load_otel()?,
    })
}

pub fn load_api_config() -> anyhow::Result<ApiConfig> {
    Ok(ApiConfig {
        log: load_logging()?,
        http: load_http()?,
        rate_limiter: load_rate_limiter()?,
        otel: load_otel()?,
        backend_client: load_backend_client()?,
    })
}

fn load_logging() -> anyhow::Result<LoggingConf> {
    let format: LogFormat = env_value("log_format")
        .unwrap_or_else(|| "text".to_string())
        .parse()
        .context("log_format")?;

    let level = env_value("log_level").unwrap_or_else(|| "info".to_string());
    if !matches!(level.as_str(), "debug" | "info" | "warn" | "error") {
        bail!("log_level: unknown level {:?}", level);
    }

    Ok(LoggingConf { format, level })
}

fn load_http() -> anyhow::Result<HttpConf> {
    let host = required_env("http_host")?;
    if !is_host(&host) {
        bail!("http_host: {:?} is neither an IP address nor an FQDN", host);
    }

    let port: u16 = required_env("http_port")?
        .parse()
        .context("http_port: not a number")?;
    if port <= 1024 {
        bail!("http_port: {} is outside 1025..=65535", port);
    }

    let conn_range = (Duration::from_millis(100), Duration::from_secs(1));
    let shutdown_range = (Duration::from_millis(100), Duration::from_secs(30));

    Ok(HttpConf {
        host,
        port,
        read_timeout: duration_env("http_read_timeout", "100ms", conn_range)?,
        write_timeout: duration_env("http_write_timeout", "100ms", conn_range)?,
        idle_timeout: duration_env("http_idle_timeout", "100ms", conn_range)?,
        shutdown_timeout: duration_env("http_shutdown_timeout", "10s", shutdown_range)?,
    })
}

fn load_rate_limiter() -> anyhow::Result<RateLimiterConf> {
    Ok(RateLimiterConf {
        max_conn: int_env("rate_limiter_max_conn", 100, (1, 100_000))?,
        max_wait: int_env("rate_limiter_max_wait", 100, (1, 100_000))?,
        retry_after_secs: int_env("rate_limiter_retry_after", 1, (1, 60))?,
    })
}

fn load_otel() -> anyhow::Result<OtelConf> {
    Ok(OtelConf {
        endpoint: url_env("otel_endpoint")?,
        shutdown_timeout: duration_env(
            "otel_shutdown_timeout",
            "500ms",
            (Duration::from_millis(100), Duration::from_secs(30)),
        )?,
    })
}

fn load_backend_client() -> anyhow::Result<BackendClientConf> {
    Ok(BackendClientConf {
        endpoint: url_env("backend_client_endpoint")?,
        request_timeout: duration_env(
            "backend_client_request_timeout",
            "200ms",
            (Duration::from_millis(100), Duration::from_secs(1)),
        )?,
    })
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn required_env(key: &str) -> anyhow::Result<String> {
    env_value(key).ok_or_else(|| anyhow!("{} is required", key))
}

fn url_env(key: &str) -> anyhow::Result<String> {
    let value = required_env(key)?;
    reqwest::Url::parse(&value).with_context(|| format!("{}: invalid URL {:?}", key, value))?;
    Ok(value)
}

fn duration_env(
    key: &str,
    default: &str,
    (min, max): (Duration, Duration),
) -> anyhow::Result<Duration> {
    let raw = env_value(key).unwrap_or_else(|| default.to_string());
    let value = parse_duration(&raw).with_context(|| format!("{}: {:?}", key, raw))?;
    if value < min || value > max {
        bail!("{}: {:?} is outside {:?}..={:?}", key, value, min, max);
    }
    Ok(value)
}

fn int_env(key: &str, default: i64, (min, max): (i64, i64)) -> anyhow::Result<i64> {
    let value = match env_value(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{}: not a number: {:?}", key, raw))?,
        None => default,
    };
    if value < min || value > max {
        bail!("{}: {} is outside {}..={}", key, value, min, max);
    }
    Ok(value)
}

/// Parses `100ms` / `10s` / `5m` / `1h` style durations.
pub(crate) fn parse_duration(input: &str) -> anyhow::Result<Duration> {
    let trimmed = input.trim();
    let unit_at = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(|| anyhow!("missing unit in duration {:?}", input))?;
    let (number, unit) = trimmed.split_at(unit_at);
    let value: u64 = number
        .parse()
        .map_err(|_| anyhow!("invalid number in duration {:?}", input))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(anyhow!("unknown duration unit {:?}", other)),
    }
}

/// An IP literal, or something shaped like a hostname: dot-separated
/// non-empty labels of alphanumerics and hyphens.
fn is_host(value: &str) -> bool {
    if value.parse::<IpAddr>().is_ok() {
        return true;
    }

    !value.is_empty()
        && value.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
