//! Promotion Orchestrator
//!
//! Periodically picks up the candidate exported by the training job,
//! calibrates it, compares it with the deployed champion and promotes it
//! when it scores better. After a promotion the inference service is told
//! to reload.

use anyhow::{Context, Result};
use fraud_model_server::{
    config::AppConfig,
    lifecycle::{
        CandidateTrainer, CycleOutcome, DeploymentOrchestrator, ExportedCandidate,
        HttpReloadNotifier, ReloadNotifier,
    },
    logging::init_tracing,
    repository::open_repository,
};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    let settings = &config.orchestrator;
    info!(
        candidate_dir = %settings.candidate_dir.display(),
        interval_secs = settings.interval_secs,
        run_once = settings.run_once,
        "Starting Promotion Orchestrator"
    );

    let repository =
        open_repository(&config.repository).context("Failed to open artifact repository")?;
    let trainer: Arc<dyn CandidateTrainer> =
        Arc::new(ExportedCandidate::new(settings.candidate_dir.clone()));

    let notifier: Option<Arc<dyn ReloadNotifier>> = match &settings.reload_url {
        Some(url) => {
            let notifier = HttpReloadNotifier::new(url, settings.notify_timeout())
                .context("Failed to build reload notifier")?;
            info!(target_url = %notifier.describe(), "Reload notification enabled");
            Some(Arc::new(notifier) as Arc<dyn ReloadNotifier>)
        }
        None => {
            info!("No reload_url configured; the inference service must be reloaded separately");
            None
        }
    };

    let orchestrator = Arc::new(DeploymentOrchestrator::from_config(
        settings, repository, trainer, notifier,
    ));

    if settings.run_once {
        let report = orchestrator.run_cycle().await?;
        info!(outcome = ?report.outcome, "Single cycle complete");
        return Ok(());
    }

    let mut ticker = tokio::time::interval(settings.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    match orchestrator.run_cycle().await {
                        Ok(report)
                            if matches!(
                                report.outcome,
                                CycleOutcome::Skipped | CycleOutcome::NoNewCandidate
                            ) => {}
                        Ok(report) => info!(
                            cycle = %report.cycle_id,
                            outcome = ?report.outcome,
                            candidate = ?report.candidate,
                            champion_score = ?report.champion_score,
                            "Scheduled cycle complete"
                        ),
                        Err(e) => error!(error = %e, committed = e.is_committed(), "Scheduled cycle failed"),
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Orchestrator shutting down...");
                break;
            }
        }
    }

    Ok(())
}
