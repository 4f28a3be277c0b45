pub mod builder;
pub mod collector;
pub mod exporter;
pub mod format;
pub mod system;

pub use builder::{MetricBuilder, MetricKind, MetricRecord};
pub use collector::{MetricsCollector, PendingSnapshot};
pub use exporter::{Exporter, ExporterSettings, HttpSink};
pub use system::{ProcSampler, SystemSampler};

use std::time::Instant;

use axum::http::Method;

/// The four HTTP verbs that get their own request counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl TrackedMethod {
    pub const ALL: [TrackedMethod; 4] = [Self::Get, Self::Post, Self::Put, Self::Delete];

    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::GET => Some(Self::Get),
            Method::POST => Some(Self::Post),
            Method::PUT => Some(Self::Put),
            Method::DELETE => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// Success/failure outcome of an auth or purchase request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Success,
    Failure,
}

/// A purchase seen by the middleware. `revenue` is `None` when the order
/// body could not be priced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Purchase {
    Success { revenue: Option<f64> },
    Failure,
}

/// A single classified request, ready to be folded into the registers.
/// This is the "write" side: the middleware builds these and pushes them in.
#[derive(Debug, Clone)]
pub struct Observation {
    /// `None` for verbs outside the tracked four (HEAD, OPTIONS, ...).
    pub method: Option<TrackedMethod>,
    pub auth: Option<Outcome>,
    /// Email or bearer token identifying the caller.
    pub session: Option<String>,
    pub purchase: Option<Purchase>,
    /// Request start to response, in milliseconds.
    pub latency_ms: f64,
    /// When the response completed; stamps the active session.
    pub at: Instant,
}

impl Observation {
    /// A bare request: no auth, no session, no purchase.
    #[cfg(test)]
    pub fn request(method: Option<TrackedMethod>, latency_ms: f64) -> Self {
        Self {
            method,
            auth: None,
            session: None,
            purchase: None,
            latency_ms,
            at: Instant::now(),
        }
    }
}
