//! Service config loader (strict YAML parsing + validation).

use std::fs;

use serde::Deserialize;

use crate::error::{MetricsError, Result};
use crate::middleware::observe::SessionKey;

/// Env var naming the config file.
pub const CONFIG_PATH_ENV: &str = "PIZZA_METRICS_CONFIG";
/// Env var that overrides `metrics.api_key`.
pub const API_KEY_ENV: &str = "METRICS_API_KEY";

const DEFAULT_CONFIG_PATH: &str = "pizza-metrics.yaml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub version: u32,

    #[serde(default)]
    pub server: ServerSection,

    pub metrics: MetricsSection,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(MetricsError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        self.server.validate()?;
        self.metrics.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Request bodies larger than this are passed through uninspected.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(MetricsError::Config(
                "server.listen must be a valid socket address".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    /// Value of the `source` attribute on every exported metric.
    pub source: String,
    /// OTLP/HTTP JSON endpoint of the sink.
    pub url: String,
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    #[serde(default)]
    pub session_key: SessionKey,

    #[serde(default = "default_session_staleness_ms")]
    pub session_staleness_ms: u64,

    /// Upper bound on outstanding sink requests.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_auth_prefix")]
    pub auth_prefix: String,

    #[serde(default = "default_order_prefix")]
    pub order_prefix: String,
}

impl MetricsSection {
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(MetricsError::Config("metrics.source must not be empty".into()));
        }
        if self.url.trim().is_empty() {
            return Err(MetricsError::Config("metrics.url must not be empty".into()));
        }
        if self.period_ms < 100 {
            return Err(MetricsError::Config(
                "metrics.period_ms must be at least 100".into(),
            ));
        }
        if self.session_staleness_ms == 0 {
            return Err(MetricsError::Config(
                "metrics.session_staleness_ms must be greater than 0".into(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(MetricsError::Config(
                "metrics.max_in_flight must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:3000".into()
}
fn default_max_body_bytes() -> usize {
    64 * 1024
}
fn default_period_ms() -> u64 {
    10_000
}
fn default_session_staleness_ms() -> u64 {
    60 * 60 * 1000
}
fn default_max_in_flight() -> usize {
    256
}
fn default_request_timeout_ms() -> u64 {
    5_000
}
fn default_auth_prefix() -> String {
    "/api/auth".into()
}
fn default_order_prefix() -> String {
    "/api/order".into()
}

/// Load from `$PIZZA_METRICS_CONFIG` (or the default path) and apply env overrides.
pub fn load() -> Result<AppConfig> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut cfg = load_from_file(&path)?;
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        cfg.metrics.api_key = key;
    }
    Ok(cfg)
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| MetricsError::Config(format!("read {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<AppConfig> {
    let cfg: AppConfig = serde_yaml::from_str(s)
        .map_err(|e| MetricsError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
