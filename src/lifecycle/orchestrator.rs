//! End-to-end promotion cycle
//!
//! ```text
//! Idle -> Training -> Calibrating -> Comparing -> Promoting  -> NotifyReload -> Idle
//!                                             \-> Discarding ----------------> Idle
//! ```
//!
//! Phases run strictly in sequence. Overlapping triggers are dropped by a
//! single-flight guard so only one cycle ever writes the candidate role.

use crate::config::OrchestratorConfig;
use crate::error::{BundleError, CycleError, NotifyError};
use crate::lifecycle::calibrator::{self, Calibration, ThresholdCalibrator};
use crate::lifecycle::decision::{PromotionPolicy, Verdict};
use crate::lifecycle::notifier::{ReloadAck, ReloadNotifier};
use crate::lifecycle::trainer::CandidateTrainer;
use crate::models::ModelBundle;
use crate::repository::{ArtifactRepository, Role};
use crate::types::FEATURE_COUNT;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Training,
    Calibrating,
    Comparing,
    Promoting,
    Discarding,
    NotifyReload,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::Training => "training",
            CycleState::Calibrating => "calibrating",
            CycleState::Comparing => "comparing",
            CycleState::Promoting => "promoting",
            CycleState::Discarding => "discarding",
            CycleState::NotifyReload => "notify_reload",
        };
        f.write_str(name)
    }
}

/// Whether the live service picked up a promotion
#[derive(Debug, Clone, PartialEq)]
pub enum ReloadStatus {
    Reloaded(ReloadAck),
    /// No notifier configured; the service adopts the champion on its next reload
    NotConfigured,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Promoted { version: String, reload: ReloadStatus },
    Discarded,
    /// The trainer had nothing that was not already evaluated
    NoNewCandidate,
    /// Another cycle was already running
    Skipped,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: CycleOutcome,
    /// Candidate threshold and F1, once calibrated
    pub candidate: Option<Calibration>,
    /// Champion score the candidate was compared against
    pub champion_score: Option<f64>,
}

/// Clears the in-flight flag when the cycle ends, however it ends
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct DeploymentOrchestrator {
    repository: Arc<dyn ArtifactRepository>,
    trainer: Arc<dyn CandidateTrainer>,
    notifier: Option<Arc<dyn ReloadNotifier>>,
    calibrator: ThresholdCalibrator,
    policy: PromotionPolicy,
    notify_timeout: Duration,
    promote_timeout: Duration,
    in_flight: AtomicBool,
}

impl DeploymentOrchestrator {
    pub fn new(repository: Arc<dyn ArtifactRepository>, trainer: Arc<dyn CandidateTrainer>) -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            repository,
            trainer,
            notifier: None,
            calibrator: ThresholdCalibrator::default(),
            policy: PromotionPolicy::default(),
            notify_timeout: defaults.notify_timeout(),
            promote_timeout: defaults.promote_timeout(),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn from_config(
        config: &OrchestratorConfig,
        repository: Arc<dyn ArtifactRepository>,
        trainer: Arc<dyn CandidateTrainer>,
        notifier: Option<Arc<dyn ReloadNotifier>>,
    ) -> Self {
        let mut orchestrator = Self::new(repository, trainer)
            .with_calibrator(ThresholdCalibrator::new(config.calibration_steps))
            .with_policy(PromotionPolicy::new(config.promote_on_tie))
            .with_timeouts(config.notify_timeout(), config.promote_timeout());
        orchestrator.notifier = notifier;
        orchestrator
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ReloadNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_calibrator(mut self, calibrator: ThresholdCalibrator) -> Self {
        self.calibrator = calibrator;
        self
    }

    pub fn with_policy(mut self, policy: PromotionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeouts(mut self, notify: Duration, promote: Duration) -> Self {
        self.notify_timeout = notify;
        self.promote_timeout = promote;
        self
    }

    /// Whether a cycle is running right now
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one cycle, or skip it if another is in progress.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let cycle_id = uuid::Uuid::new_v4().simple().to_string();
        let started_at = Utc::now();
        let clock = Instant::now();

        let Some(_guard) = FlightGuard::acquire(&self.in_flight) else {
            info!(cycle = %cycle_id, "Promotion cycle already running, skipping trigger");
            return Ok(CycleReport {
                cycle_id,
                started_at,
                duration: clock.elapsed(),
                outcome: CycleOutcome::Skipped,
                candidate: None,
                champion_score: None,
            });
        };

        let mut report = CycleReport {
            cycle_id: cycle_id.clone(),
            started_at,
            duration: Duration::ZERO,
            outcome: CycleOutcome::Skipped,
            candidate: None,
            champion_score: None,
        };

        let result = self
            .execute(&mut report)
            .instrument(info_span!("promotion_cycle", cycle = %cycle_id))
            .await;
        report.duration = clock.elapsed();

        match result {
            Ok(outcome) => {
                report.outcome = outcome;
                info!(
                    cycle = %cycle_id,
                    outcome = ?report.outcome,
                    duration_ms = report.duration.as_millis() as u64,
                    "Promotion cycle finished"
                );
                Ok(report)
            }
            Err(e) => {
                error!(
                    cycle = %cycle_id,
                    committed = e.is_committed(),
                    error = %e,
                    "Promotion cycle failed"
                );
                Err(e)
            }
        }
    }

    async fn execute(&self, report: &mut CycleReport) -> Result<CycleOutcome, CycleError> {
        let mut state = CycleState::Idle;

        // a leftover candidate means an earlier cycle died mid-way
        if self.repository.contains(Role::Candidate).await? {
            warn!("Discarding stale candidate from an interrupted cycle");
            self.repository.discard(Role::Candidate).await?;
        }

        if !self.trainer.has_pending().await.map_err(CycleError::Training)? {
            info!("No new candidate since the last evaluation");
            return Ok(CycleOutcome::NoNewCandidate);
        }

        transition(&mut state, CycleState::Training);
        let trained = self.trainer.train().await.map_err(CycleError::Training)?;

        transition(&mut state, CycleState::Calibrating);
        let calibration = self
            .calibrator
            .calibrate(&trained.holdout_labels, &trained.holdout_probabilities)?;
        report.candidate = Some(calibration);

        if let Ok(evaluation) = calibrator::evaluate(
            &trained.holdout_labels,
            &trained.holdout_probabilities,
            calibration.threshold,
        ) {
            info!(
                threshold = evaluation.threshold,
                precision = evaluation.precision,
                recall = evaluation.recall,
                f1 = evaluation.f1,
                support = evaluation.support,
                "Candidate calibrated"
            );
        }

        let bundle = ModelBundle::new(
            trained.classifier,
            trained.transform,
            calibration.threshold,
            calibration.f1,
        )?;
        // the service refuses any other width, so never let it become champion
        if bundle.n_features() != FEATURE_COUNT {
            return Err(BundleError::FeatureCount {
                expected: FEATURE_COUNT,
                actual: bundle.n_features(),
            }
            .into());
        }
        self.repository.store(Role::Candidate, &bundle).await?;

        transition(&mut state, CycleState::Comparing);
        let champion_score = match self.repository.quality_score(Role::Champion).await {
            Ok(score) => score,
            Err(e) => {
                self.discard_candidate().await;
                return Err(e.into());
            }
        };
        report.champion_score = champion_score;

        let verdict = self.policy.decide(champion_score, calibration.f1);
        info!(
            champion_score = ?champion_score,
            candidate_score = calibration.f1,
            verdict = ?verdict,
            "Compared candidate with champion"
        );

        if verdict == Verdict::Retain {
            transition(&mut state, CycleState::Discarding);
            self.repository.discard(Role::Candidate).await?;
            self.trainer.mark_evaluated();
            transition(&mut state, CycleState::Idle);
            return Ok(CycleOutcome::Discarded);
        }

        transition(&mut state, CycleState::Promoting);
        let version = self.promote().await?;
        self.trainer.mark_evaluated();

        transition(&mut state, CycleState::NotifyReload);
        let reload = match &self.notifier {
            None => {
                info!(version = %version, "No reload notifier configured");
                ReloadStatus::NotConfigured
            }
            Some(notifier) => match self.notify(notifier.as_ref()).await {
                Ok(ack) => ReloadStatus::Reloaded(ack),
                Err(source) => {
                    error!(
                        version = %version,
                        notifier = %notifier.describe(),
                        error = %source,
                        "Promotion committed but the live service did not reload; a follow-up reload is required"
                    );
                    return Err(CycleError::PromotionInconsistency { version, source });
                }
            },
        };

        transition(&mut state, CycleState::Idle);
        Ok(CycleOutcome::Promoted { version, reload })
    }

    /// Promote the candidate within the promote timeout.
    ///
    /// A timeout can cancel the promotion after the champion pointer already
    /// moved. The pointer is re-read in that case, and a moved pointer counts
    /// as a committed promotion so the reload still happens.
    async fn promote(&self) -> Result<String, CycleError> {
        let before = self.repository.version(Role::Champion).await?;

        let elapsed = match tokio::time::timeout(
            self.promote_timeout,
            self.repository.promote(Role::Candidate, Role::Champion),
        )
        .await
        {
            Ok(result) => return Ok(result?),
            Err(elapsed) => elapsed,
        };

        let timed_out = CycleError::Timeout {
            phase: "promotion",
            timeout: self.promote_timeout,
        };
        let after = match self.repository.version(Role::Champion).await {
            Ok(after) => after,
            Err(e) => {
                error!(error = %e, "Promotion timed out and the champion pointer could not be read");
                return Err(timed_out);
            }
        };

        match after {
            Some(version) if before.as_deref() != Some(version.as_str()) => {
                warn!(
                    version = %version,
                    timeout_ms = self.promote_timeout.as_millis() as u64,
                    %elapsed,
                    "Promotion timed out after the champion was committed"
                );
                self.discard_candidate().await;
                Ok(version)
            }
            _ => {
                warn!(
                    timeout_ms = self.promote_timeout.as_millis() as u64,
                    "Promotion timed out before commit, champion unchanged"
                );
                Err(timed_out)
            }
        }
    }

    async fn notify(&self, notifier: &dyn ReloadNotifier) -> Result<ReloadAck, NotifyError> {
        tokio::time::timeout(self.notify_timeout, notifier.notify_reload())
            .await
            .map_err(|_| NotifyError::Timeout(self.notify_timeout))?
    }

    async fn discard_candidate(&self) {
        if let Err(e) = self.repository.discard(Role::Candidate).await {
            warn!(error = %e, "Could not discard candidate");
        }
    }
}

fn transition(state: &mut CycleState, next: CycleState) {
    info!(from = %state, to = %next, "Cycle state change");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::trainer::TrainedCandidate;
    use crate::models::{IdentityTransform, LogisticRegression};
    use crate::repository::{BundleRepository, MemoryObjectStore};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    struct FailingTrainer;

    #[async_trait]
    impl CandidateTrainer for FailingTrainer {
        async fn train(&self) -> anyhow::Result<TrainedCandidate> {
            anyhow::bail!("dataset unavailable")
        }
    }

    /// Blocks inside `train` until released
    struct GatedTrainer {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl CandidateTrainer for GatedTrainer {
        async fn train(&self) -> anyhow::Result<TrainedCandidate> {
            self.entered.notify_one();
            self.release.notified().await;
            anyhow::bail!("released")
        }
    }

    fn champion() -> ModelBundle {
        ModelBundle::new(
            Arc::new(LogisticRegression::constant(30, 0.5)),
            Arc::new(IdentityTransform { n_features: 30 }),
            0.5,
            0.8,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_training_failure_leaves_champion() {
        let store = Arc::new(MemoryObjectStore::new());
        let repo = Arc::new(BundleRepository::new(store.clone()));
        let version = repo.store(Role::Champion, &champion()).await.unwrap();

        let orchestrator = DeploymentOrchestrator::new(repo.clone(), Arc::new(FailingTrainer));
        let err = orchestrator.run_cycle().await.unwrap_err();

        assert!(matches!(err, CycleError::Training(_)));
        assert!(!err.is_committed());
        assert!(!orchestrator.is_running());
        assert_eq!(repo.fetch(Role::Champion).await.unwrap().version, version);
        assert!(!repo.contains(Role::Candidate).await.unwrap());
    }

    /// Perfectly separable hold-out set for an `n`-wide model
    struct WidthTrainer(usize);

    #[async_trait]
    impl CandidateTrainer for WidthTrainer {
        async fn train(&self) -> anyhow::Result<TrainedCandidate> {
            Ok(TrainedCandidate {
                classifier: Arc::new(LogisticRegression::constant(self.0, 0.9)),
                transform: Arc::new(IdentityTransform { n_features: self.0 }),
                holdout_labels: vec![1, 0],
                holdout_probabilities: vec![0.9, 0.1],
            })
        }
    }

    #[tokio::test]
    async fn test_candidate_of_wrong_width_is_rejected() {
        let repo = Arc::new(BundleRepository::new(Arc::new(MemoryObjectStore::new())));
        let version = repo.store(Role::Champion, &champion()).await.unwrap();

        let orchestrator = DeploymentOrchestrator::new(repo.clone(), Arc::new(WidthTrainer(12)));
        let err = orchestrator.run_cycle().await.unwrap_err();

        assert!(matches!(
            err,
            CycleError::Bundle(BundleError::FeatureCount { expected: 30, actual: 12 })
        ));
        let stored = repo.fetch(Role::Champion).await.unwrap();
        assert_eq!(stored.version, version);
        assert_eq!(stored.bundle.n_features(), 30);
        assert!(!repo.contains(Role::Candidate).await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_score_candidate_is_rejected_on_first_deployment() {
        let repo = Arc::new(BundleRepository::new(Arc::new(MemoryObjectStore::new())));
        let err = DeploymentOrchestrator::new(repo.clone(), Arc::new(TrainedOnNegatives))
            .run_cycle()
            .await
            .unwrap_err();

        assert!(matches!(err, CycleError::Bundle(BundleError::QualityScore(_))));
        assert!(!repo.contains(Role::Champion).await.unwrap());
        assert!(!repo.contains(Role::Candidate).await.unwrap());
    }

    /// Hold-out set without a single positive: best F1 is 0
    struct TrainedOnNegatives;

    #[async_trait]
    impl CandidateTrainer for TrainedOnNegatives {
        async fn train(&self) -> anyhow::Result<TrainedCandidate> {
            Ok(TrainedCandidate {
                classifier: Arc::new(LogisticRegression::constant(30, 0.2)),
                transform: Arc::new(IdentityTransform { n_features: 30 }),
                holdout_labels: vec![0, 0, 0],
                holdout_probabilities: vec![0.2, 0.1, 0.3],
            })
        }
    }

    fn write_export(dir: &std::path::Path, rows: usize) {
        use crate::lifecycle::trainer::HoldoutSet;
        use crate::models::{codec, Classifier, FeatureTransform};

        let mut coefficients = vec![0.0; 30];
        coefficients[0] = 8.0;
        let classifier = LogisticRegression::new(coefficients, -4.0);
        let transform = IdentityTransform { n_features: 30 };

        let mut features = Vec::new();
        let mut labels = Vec::new();
        for i in 0..rows {
            let mut row = vec![0.0; 30];
            row[0] = (i % 2) as f64;
            features.push(row);
            labels.push((i % 2) as u8);
        }

        std::fs::write(dir.join("classifier.json"), codec::encode(&classifier.to_artifact()).unwrap()).unwrap();
        std::fs::write(dir.join("transform.json"), codec::encode(&transform.to_artifact()).unwrap()).unwrap();
        std::fs::write(
            dir.join("holdout.json"),
            serde_json::to_vec(&HoldoutSet { features, labels }).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_same_export_is_evaluated_once() {
        use crate::lifecycle::trainer::ExportedCandidate;

        let dir = tempfile::tempdir().unwrap();
        write_export(dir.path(), 4);

        let repo = Arc::new(BundleRepository::new(Arc::new(MemoryObjectStore::new())));
        let orchestrator =
            DeploymentOrchestrator::new(repo.clone(), Arc::new(ExportedCandidate::new(dir.path())));

        let first = orchestrator.run_cycle().await.unwrap();
        assert!(matches!(first.outcome, CycleOutcome::Promoted { .. }));
        let champion = repo.version(Role::Champion).await.unwrap();

        let second = orchestrator.run_cycle().await.unwrap();
        assert_eq!(second.outcome, CycleOutcome::NoNewCandidate);
        assert_eq!(repo.version(Role::Champion).await.unwrap(), champion);

        // a fresh export with the same score ties and is discarded
        write_export(dir.path(), 6);
        let third = orchestrator.run_cycle().await.unwrap();
        assert_eq!(third.outcome, CycleOutcome::Discarded);
        assert_eq!(repo.version(Role::Champion).await.unwrap(), champion);
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_skipped() {
        let repo = Arc::new(BundleRepository::new(Arc::new(MemoryObjectStore::new())));
        let trainer = Arc::new(GatedTrainer {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let orchestrator = Arc::new(DeploymentOrchestrator::new(repo, trainer.clone()));

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.run_cycle().await }
        });
        trainer.entered.notified().await;
        assert!(orchestrator.is_running());

        let second = orchestrator.run_cycle().await.unwrap();
        assert_eq!(second.outcome, CycleOutcome::Skipped);

        trainer.release.notify_one();
        assert!(first.await.unwrap().is_err());
        assert!(!orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_stale_candidate_is_cleared() {
        let repo = Arc::new(BundleRepository::new(Arc::new(MemoryObjectStore::new())));
        repo.store(Role::Candidate, &champion()).await.unwrap();

        let orchestrator = DeploymentOrchestrator::new(repo.clone(), Arc::new(FailingTrainer));
        assert!(orchestrator.run_cycle().await.is_err());
        assert!(!repo.contains(Role::Candidate).await.unwrap());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(CycleState::NotifyReload.to_string(), "notify_reload");
        assert_eq!(
            serde_json::to_string(&CycleState::Calibrating).unwrap(),
            "\"calibrating\""
        );
    }
}
