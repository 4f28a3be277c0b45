use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

mod config;
mod error;
mod handlers;
mod metrics;
mod middleware;
mod server;

use metrics::{Exporter, ExporterSettings, HttpSink, MetricsCollector, ProcSampler};
use middleware::observe::ObservationRules;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Metric registers — the middleware writes, the exporter drains.
    pub metrics: Arc<MetricsCollector>,

    /// Route-family rules for the observation middleware.
    pub rules: ObservationRules,

    /// Users and tokens behind the stand-in auth routes.
    pub accounts: handlers::auth::Accounts,
}

impl AppState {
    pub fn new(metrics: Arc<MetricsCollector>, rules: ObservationRules) -> Self {
        Self {
            metrics,
            rules,
            accounts: handlers::auth::Accounts::default(),
        }
    }
}

#[tokio::main]
async fn main() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── 1. Config ────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "config load failed");
            std::process::exit(1);
        }
    };
    if cfg.metrics.api_key.is_empty() {
        warn!("metrics.api_key is empty; set it in the config or via {}", config::API_KEY_ENV);
    }

    // ── 2. Metrics pipeline ──────────────────────────────────────
    let collector = Arc::new(MetricsCollector::new());
    let sink = match HttpSink::new(&cfg.metrics) {
        Ok(sink) => sink,
        Err(e) => {
            error!(error = %e, "metrics sink client setup failed");
            std::process::exit(1);
        }
    };
    let exporter = Exporter::new(
        collector.clone(),
        Arc::new(ProcSampler::default()),
        Arc::new(sink),
        ExporterSettings::from(&cfg.metrics),
    )
    .start();

    // ── 3. Build shared state + router ───────────────────────────
    let state = Arc::new(AppState::new(collector, ObservationRules::from_config(&cfg)));
    let app = server::create_router(state);

    // ── 4. Bind & serve ──────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&cfg.server.listen)
        .await
        .expect("failed to bind listen address");

    info!(
        listen = %cfg.server.listen,
        source = %cfg.metrics.source,
        sink = %cfg.metrics.url,
        "pizza-metrics listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server exited with error");

    exporter.shutdown().await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
