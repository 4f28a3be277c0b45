//! Periodic flush: drain the collector, build records, ship them to the sink.
//!
//! Each record goes out as its own POST on a spawned task. The tasks live in
//! a bounded `JoinSet`; a full set means the sink is not keeping up and new
//! records are dropped rather than queued.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::collector::{mean, Drained};
use super::format::{format_snapshot, now_unix_nano};
use super::{MetricBuilder, MetricsCollector, SystemSampler, TrackedMethod};
use crate::config::MetricsSection;
use crate::error::{MetricsError, Result};

/// How long shutdown waits on outstanding sends before abandoning them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ─── Sink ────────────────────────────────────────────────────────

/// Destination for serialized metric envelopes.
#[async_trait]
pub trait MetricSink: Send + Sync + 'static {
    async fn push(&self, payload: String) -> Result<()>;
}

/// OTLP/HTTP JSON endpoint authenticated with a bearer key.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpSink {
    pub fn new(cfg: &MetricsSection) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url: cfg.url.clone(),
            api_key: cfg.api_key.clone(),
        })
    }
}

#[async_trait]
impl MetricSink for HttpSink {
    async fn push(&self, payload: String) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MetricsError::SinkRejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

// ─── Exporter ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ExporterSettings {
    pub source: String,
    pub period: Duration,
    pub session_staleness: Duration,
    pub max_in_flight: usize,
}

impl From<&MetricsSection> for ExporterSettings {
    fn from(cfg: &MetricsSection) -> Self {
        Self {
            source: cfg.source.clone(),
            period: Duration::from_millis(cfg.period_ms),
            session_staleness: Duration::from_millis(cfg.session_staleness_ms),
            max_in_flight: cfg.max_in_flight,
        }
    }
}

pub struct Exporter {
    collector: Arc<MetricsCollector>,
    sampler: Arc<dyn SystemSampler>,
    sink: Arc<dyn MetricSink>,
    settings: ExporterSettings,
    in_flight: JoinSet<()>,
}

impl Exporter {
    pub fn new(
        collector: Arc<MetricsCollector>,
        sampler: Arc<dyn SystemSampler>,
        sink: Arc<dyn MetricSink>,
        settings: ExporterSettings,
    ) -> Self {
        Self {
            collector,
            sampler,
            sink,
            settings,
            in_flight: JoinSet::new(),
        }
    }

    /// Drain the collector and build this cycle's records.
    ///
    /// The collector is reset before this returns, so a failed send later
    /// loses the interval instead of re-exporting it.
    pub fn collect(&self, now: Instant) -> MetricBuilder {
        let drained = self.collector.drain(now, self.settings.session_staleness);
        let cpu = self.sampler.cpu_usage().unwrap_or_else(|e| {
            warn!(error = %e, "cpu sample failed");
            0.0
        });
        let memory = self.sampler.memory_usage().unwrap_or_else(|e| {
            warn!(error = %e, "memory sample failed");
            0.0
        });

        build_records(&self.settings.source, &drained, cpu, memory)
    }

    /// Run one flush cycle. Returns how many records were handed to the sink.
    pub fn flush(&mut self) -> usize {
        let records = self.collect(Instant::now()).into_records();
        let stamp = now_unix_nano();
        let mut sent = 0;

        for (record, envelope) in records.iter().zip(format_snapshot(&records, stamp)) {
            let payload = match serde_json::to_string(&envelope) {
                Ok(p) => p,
                Err(e) => {
                    error!(metric = %record.name, error = %e, "metric serialization failed");
                    continue;
                }
            };
            if self.dispatch(payload) {
                sent += 1;
            }
        }

        debug!(records = records.len(), sent, "flush complete");
        sent
    }

    /// `flush`, but a panic inside the cycle is logged and reported as zero
    /// records sent. Whatever the cycle had already drained is lost.
    fn guarded_flush(&mut self) -> usize {
        match panic::catch_unwind(AssertUnwindSafe(|| self.flush())) {
            Ok(sent) => sent,
            Err(_) => {
                error!("metrics flush panicked, skipping this cycle");
                0
            }
        }
    }

    fn dispatch(&mut self, payload: String) -> bool {
        self.reap_finished();
        if self.in_flight.len() >= self.settings.max_in_flight {
            warn!(
                in_flight = self.in_flight.len(),
                "metrics sink backlog full, dropping record"
            );
            return false;
        }

        let sink = self.sink.clone();
        self.in_flight.spawn(async move {
            if let Err(e) = sink.push(payload.clone()).await {
                error!(error = %e, payload = %payload, "failed to push metric to sink");
            }
        });
        true
    }

    fn reap_finished(&mut self) {
        while let Some(res) = self.in_flight.try_join_next() {
            if let Err(e) = res {
                if e.is_panic() {
                    error!(error = %e, "metric push task panicked");
                }
            }
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Wait up to `grace` for outstanding sends, then abort the rest.
    pub async fn settle(&mut self, grace: Duration) {
        let all = async { while self.in_flight.join_next().await.is_some() {} };
        if tokio::time::timeout(grace, all).await.is_err() {
            warn!(
                abandoned = self.in_flight.len(),
                "abandoning outstanding metric pushes"
            );
            self.in_flight.abort_all();
        }
    }

    /// Spawn the timer loop. The first flush happens one period from now.
    pub fn start(self) -> ExporterHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let period = self.settings.period;
        let handle = tokio::spawn(self.run(shutdown_rx));

        info!(period_ms = period.as_millis() as u64, "metrics exporter started");
        ExporterHandle {
            shutdown_tx,
            handle,
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = self.settings.period;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.guarded_flush();
                }
                _ = shutdown.changed() => {
                    debug!("metrics exporter shutting down");
                    break;
                }
            }
        }

        self.guarded_flush();
        self.settle(SHUTDOWN_GRACE).await;
    }
}

/// Running exporter. Dropping it also stops the loop (after a final flush),
/// but nothing waits for that to happen.
pub struct ExporterHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ExporterHandle {
    /// Stop the timer, do a final flush and wait (bounded) for its sends.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "metrics exporter task failed");
        }
        info!("metrics exporter stopped");
    }
}

/// Turn one drained window plus host samples into records, in export order.
pub fn build_records(source: &str, d: &Drained, cpu: f64, memory: f64) -> MetricBuilder {
    let mut buf = MetricBuilder::new(source);

    for method in TrackedMethod::ALL {
        buf.sum(
            "http_requests_total",
            d.requests.count(method),
            "requests",
            &[("method", method.as_str())],
        );
    }
    if let Some(avg) = mean(&d.requests.latency_ms) {
        buf.gauge("http_request_latency", avg, "milliseconds", &[]);
    }

    buf.sum("auth_attempts", d.auth.success, "attempts", &[("status", "success")]);
    buf.sum("auth_attempts", d.auth.failure, "attempts", &[("status", "failure")]);

    buf.gauge("active_users", d.active_sessions, "users", &[]);

    buf.gauge("cpu_usage", cpu, "percentage", &[]);
    buf.gauge("memory_usage", memory, "percentage", &[]);

    let p = &d.purchases;
    buf.sum("purchase_metrics", p.success, "attempts", &[("status", "success")]);
    buf.sum("purchase_metrics", p.failure, "attempts", &[("status", "failure")]);
    buf.gauge("purchase_metrics", p.revenue, "btc", &[("status", "revenue")]);
    if let Some(avg) = mean(&p.latency_ms) {
        buf.gauge("purchase_metrics", avg, "milliseconds", &[("status", "latency")]);
    }

    buf
}
