//! Error type for the metrics pipeline.
//!
//! Nothing here ever reaches an HTTP client: the exporter logs these and
//! moves on to the next record or the next tick.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetricsError>;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("config: {0}")]
    Config(String),
    #[error("serialize metric: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("sink rejected metric (status {status}): {body}")]
    SinkRejected { status: u16, body: String },
    #[error("system sampler: {0}")]
    Sampler(#[from] std::io::Error),
}
