use std::collections::HashMap;
use std::mem;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use super::{Observation, Outcome, Purchase, TrackedMethod};

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe register set.
/// The middleware calls `observe()`, the exporter calls `drain()`.
///
/// One lock guards every register so a drain sees a consistent cut:
/// an observation lands either wholly before it or wholly after it.
pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

/// Per-method request counts and latency samples since the last flush.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestCounters {
    pub get: u64,
    pub post: u64,
    pub put: u64,
    pub delete: u64,
    pub latency_ms: Vec<f64>,
}

impl RequestCounters {
    pub fn count(&self, method: TrackedMethod) -> u64 {
        match method {
            TrackedMethod::Get => self.get,
            TrackedMethod::Post => self.post,
            TrackedMethod::Put => self.put,
            TrackedMethod::Delete => self.delete,
        }
    }

    fn bump(&mut self, method: TrackedMethod) {
        let slot = match method {
            TrackedMethod::Get => &mut self.get,
            TrackedMethod::Post => &mut self.post,
            TrackedMethod::Put => &mut self.put,
            TrackedMethod::Delete => &mut self.delete,
        };
        *slot += 1;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuthAttempts {
    pub success: u64,
    pub failure: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PurchaseStats {
    pub success: u64,
    pub failure: u64,
    pub revenue: f64,
    pub latency_ms: Vec<f64>,
}

/// Everything one flush exports. The counters inside have already been
/// reset in the collector by the time the caller sees this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Drained {
    pub requests: RequestCounters,
    pub auth: AuthAttempts,
    /// Sessions left after eviction.
    pub active_sessions: usize,
    pub purchases: PurchaseStats,
}

/// Non-draining view of the registers for the debug endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PendingSnapshot {
    pub requests: RequestCounters,
    pub auth: AuthAttempts,
    pub active_sessions: usize,
    pub purchases: PurchaseStats,
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

// ─── Internal state ──────────────────────────────────────────────

#[derive(Default)]
struct Inner {
    requests: RequestCounters,
    auth: AuthAttempts,
    // session key → last seen
    sessions: HashMap<String, Instant>,
    purchases: PurchaseStats,
}

// ─── MetricsCollector impl ───────────────────────────────────────

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Fold one classified request into the registers.
    pub fn observe(&self, obs: Observation) {
        self.inner.lock().observe(obs);
    }

    /// Evict stale sessions, hand back every register, and reset the
    /// per-flush ones in the same critical section.
    ///
    /// Active sessions are only evicted, never reset.
    pub fn drain(&self, now: Instant, staleness: Duration) -> Drained {
        let mut inner = self.inner.lock();
        inner.evict_sessions(now, staleness);

        Drained {
            requests: mem::take(&mut inner.requests),
            auth: mem::take(&mut inner.auth),
            active_sessions: inner.sessions.len(),
            purchases: mem::take(&mut inner.purchases),
        }
    }

    /// Copy of the registers as they stand, without resetting anything.
    pub fn pending(&self) -> PendingSnapshot {
        let inner = self.inner.lock();
        PendingSnapshot {
            requests: inner.requests.clone(),
            auth: inner.auth,
            active_sessions: inner.sessions.len(),
            purchases: inner.purchases.clone(),
        }
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn observe(&mut self, obs: Observation) {
        if let Some(method) = obs.method {
            self.requests.bump(method);
        }

        match obs.auth {
            Some(Outcome::Success) => self.auth.success += 1,
            Some(Outcome::Failure) => self.auth.failure += 1,
            None => {}
        }

        if let Some(key) = obs.session {
            self.sessions.insert(key, obs.at);
        }

        match obs.purchase {
            Some(Purchase::Success { revenue }) => {
                self.purchases.success += 1;
                if let Some(revenue) = revenue {
                    self.purchases.revenue += revenue;
                }
                self.purchases.latency_ms.push(obs.latency_ms);
            }
            Some(Purchase::Failure) => self.purchases.failure += 1,
            None => {}
        }

        self.requests.latency_ms.push(obs.latency_ms);
    }

    fn evict_sessions(&mut self, now: Instant, staleness: Duration) {
        self.sessions
            .retain(|_, seen| now.saturating_duration_since(*seen) <= staleness);
    }
}
