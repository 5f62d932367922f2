//! Fraud Model Server - Main Entry Point
//!
//! Loads the champion bundle from the artifact repository and serves
//! predictions over HTTP. `POST /reload` swaps in a newly promoted champion
//! without dropping in-flight requests.

use anyhow::{Context, Result};
use fraud_model_server::{
    config::AppConfig,
    logging::init_tracing,
    metrics::{MetricsReporter, ServingMetrics},
    repository::open_repository,
    serving::{router, AppState, InferenceService},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    info!("Starting Fraud Model Server");

    let repository =
        open_repository(&config.repository).context("Failed to open artifact repository")?;
    let metrics = Arc::new(ServingMetrics::new());
    let service = Arc::new(InferenceService::start(repository, metrics.clone()).await);

    match service.snapshot() {
        Some(live) => info!(
            version = %live.version,
            threshold = live.bundle.threshold(),
            quality_score = live.bundle.quality_score(),
            "Champion loaded"
        ),
        None => warn!("No champion available; /predict answers 503 until a reload succeeds"),
    }

    if config.server.metrics_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.server.metrics_interval_secs);
        tokio::spawn(reporter.start());
    }

    let app = router(AppState {
        service,
        reload_timeout: config.server.reload_timeout(),
    });

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen_addr))?;
    info!(addr = %config.server.listen_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Server shutting down...");
    metrics.print_summary();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
