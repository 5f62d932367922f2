//! End-to-end promotion scenarios against an in-memory artifact store

use async_trait::async_trait;
use fraud_model_server::error::{CycleError, StoreError};
use fraud_model_server::lifecycle::{
    CandidateTrainer, CycleOutcome, DeploymentOrchestrator, ReloadNotifier, ReloadStatus,
    TrainedCandidate,
};
use fraud_model_server::metrics::ServingMetrics;
use fraud_model_server::models::{IdentityTransform, LogisticRegression, ModelBundle};
use fraud_model_server::repository::{
    ArtifactRepository, BundleRepository, MemoryObjectStore, ObjectStore, Role,
};
use fraud_model_server::serving::InferenceService;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Hands out a fixed candidate
struct StaticTrainer {
    probability: f64,
    labels: Vec<u8>,
    probabilities: Vec<f64>,
}

#[async_trait]
impl CandidateTrainer for StaticTrainer {
    async fn train(&self) -> anyhow::Result<TrainedCandidate> {
        Ok(TrainedCandidate {
            classifier: Arc::new(LogisticRegression::constant(30, self.probability)),
            transform: Arc::new(IdentityTransform { n_features: 30 }),
            holdout_labels: self.labels.clone(),
            holdout_probabilities: self.probabilities.clone(),
        })
    }
}

/// Best F1 is 6/7 (about 0.857), first reached at threshold 10/99
fn strong_candidate() -> StaticTrainer {
    StaticTrainer {
        probability: 0.65,
        labels: vec![1, 1, 1, 0, 0],
        probabilities: vec![0.9, 0.8, 0.7, 0.75, 0.1],
    }
}

/// Best F1 is 2/3
fn weak_candidate() -> StaticTrainer {
    StaticTrainer {
        probability: 0.65,
        labels: vec![1, 0],
        probabilities: vec![0.5, 0.5],
    }
}

fn bundle(probability: f64, threshold: f64, score: f64) -> ModelBundle {
    ModelBundle::new(
        Arc::new(LogisticRegression::constant(30, probability)),
        Arc::new(IdentityTransform { n_features: 30 }),
        threshold,
        score,
    )
    .unwrap()
}

struct Harness {
    store: Arc<MemoryObjectStore>,
    repo: Arc<BundleRepository>,
    service: Arc<InferenceService>,
}

async fn harness_with_champion(score: f64) -> Harness {
    let store = Arc::new(MemoryObjectStore::new());
    let repo = Arc::new(BundleRepository::new(store.clone()));
    repo.store(Role::Champion, &bundle(0.4, 0.5, score)).await.unwrap();
    let service =
        Arc::new(InferenceService::start(repo.clone(), Arc::new(ServingMetrics::new())).await);
    Harness { store, repo, service }
}

fn orchestrator(h: &Harness, trainer: StaticTrainer) -> DeploymentOrchestrator {
    DeploymentOrchestrator::new(h.repo.clone(), Arc::new(trainer))
        .with_notifier(h.service.clone() as Arc<dyn ReloadNotifier>)
}

#[tokio::test]
async fn better_candidate_is_promoted_and_served() {
    let h = harness_with_champion(0.80).await;
    let old_version = h.service.status().model_version.unwrap();

    let report = orchestrator(&h, strong_candidate()).run_cycle().await.unwrap();

    let calibration = report.candidate.unwrap();
    assert!((calibration.f1 - 6.0 / 7.0).abs() < 1e-9);
    assert!((calibration.threshold - 10.0 / 99.0).abs() < 1e-9);
    assert_eq!(report.champion_score, Some(0.80));

    let CycleOutcome::Promoted { version, reload } = report.outcome else {
        panic!("expected promotion, got {:?}", report.outcome);
    };
    let ReloadStatus::Reloaded(ack) = reload else {
        panic!("expected reload");
    };
    assert_eq!(ack.model_version.as_deref(), Some(version.as_str()));
    assert_ne!(version, old_version);

    // live service now answers with the new bundle
    let status = h.service.status();
    assert_eq!(status.model_version.as_deref(), Some(version.as_str()));
    assert!((status.threshold.unwrap() - calibration.threshold).abs() < 1e-12);
    assert!((status.model_f1_score.unwrap() - calibration.f1).abs() < 1e-12);
    let result = h.service.predict(&[0.0; 30]).unwrap();
    assert!((result.probability - 0.65).abs() < 1e-9);

    // candidate slot is empty and only the new champion's files remain
    assert!(!h.repo.contains(Role::Candidate).await.unwrap());
    assert!(h.store.keys().iter().all(|k| !k.contains(&old_version)));
}

#[tokio::test]
async fn weaker_candidate_is_discarded() {
    let h = harness_with_champion(0.80).await;
    let before = h.service.status();

    let report = orchestrator(&h, weak_candidate()).run_cycle().await.unwrap();

    assert_eq!(report.outcome, CycleOutcome::Discarded);
    assert!((report.candidate.unwrap().f1 - 2.0 / 3.0).abs() < 1e-9);
    assert!(!h.repo.contains(Role::Candidate).await.unwrap());
    assert_eq!(h.service.status(), before);
    assert_eq!(h.repo.quality_score(Role::Champion).await.unwrap(), Some(0.80));
}

#[tokio::test]
async fn equal_score_keeps_champion_unless_configured() {
    let perfect = || StaticTrainer {
        probability: 0.65,
        labels: vec![1, 0],
        probabilities: vec![0.9, 0.1],
    };
    let h = harness_with_champion(1.0).await;
    let report = orchestrator(&h, perfect()).run_cycle().await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Discarded);

    let report = orchestrator(&h, perfect())
        .with_policy(fraud_model_server::lifecycle::PromotionPolicy::new(true))
        .run_cycle()
        .await
        .unwrap();
    assert!(matches!(report.outcome, CycleOutcome::Promoted { .. }));
}

#[tokio::test]
async fn first_deployment_promotes_without_champion() {
    let store = Arc::new(MemoryObjectStore::new());
    let repo = Arc::new(BundleRepository::new(store));
    let service =
        Arc::new(InferenceService::start(repo.clone(), Arc::new(ServingMetrics::new())).await);
    assert!(!service.is_ready());

    let report = DeploymentOrchestrator::new(repo.clone(), Arc::new(weak_candidate()))
        .with_notifier(service.clone() as Arc<dyn ReloadNotifier>)
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(report.champion_score, None);
    assert!(matches!(report.outcome, CycleOutcome::Promoted { .. }));
    assert!(service.is_ready());
}

#[tokio::test]
async fn interrupted_promotion_keeps_old_champion() {
    let h = harness_with_champion(0.80).await;
    let before = h.service.status();

    // candidate commit takes five writes, the promotion's first write fails
    h.store.fail_puts_after(5);
    let err = orchestrator(&h, strong_candidate()).run_cycle().await.unwrap_err();
    assert!(matches!(err, CycleError::Repository(_)));
    assert!(!err.is_committed());

    h.store.heal();
    let champion = h.repo.fetch(Role::Champion).await.unwrap();
    assert_eq!(Some(champion.version), before.model_version);
    assert_eq!(champion.bundle.quality_score(), 0.80);
    assert_eq!(h.service.status(), before);

    // the next cycle clears the leftover candidate and completes
    let report = orchestrator(&h, strong_candidate()).run_cycle().await.unwrap();
    assert!(matches!(report.outcome, CycleOutcome::Promoted { .. }));
}

#[tokio::test]
async fn failed_reload_after_commit_is_reported() {
    let h = harness_with_champion(0.80).await;
    let before = h.service.status();

    // a service that reads from a store which is offline cannot reload
    let offline = Arc::new(MemoryObjectStore::new());
    offline.set_offline(true);
    let detached = Arc::new(InferenceService::new(
        Arc::new(BundleRepository::new(offline)),
        Arc::new(ServingMetrics::new()),
    ));

    let err = DeploymentOrchestrator::new(h.repo.clone(), Arc::new(strong_candidate()))
        .with_notifier(detached as Arc<dyn ReloadNotifier>)
        .run_cycle()
        .await
        .unwrap_err();

    let CycleError::PromotionInconsistency { version, .. } = &err else {
        panic!("expected inconsistency, got {:?}", err);
    };
    assert!(err.is_committed());
    // the repository holds the new champion; the running service does not yet
    assert_eq!(&h.repo.fetch(Role::Champion).await.unwrap().version, version);
    assert_eq!(h.service.status(), before);

    h.service.reload().await.unwrap();
    assert_eq!(h.service.status().model_version.as_ref(), Some(version));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn predictions_never_mix_bundles_during_reloads() {
    // probability identifies the bundle: (0.2, 0.3) or (0.6, 0.7)
    let pairs = [(0.2, 0.3), (0.6, 0.7)];
    let store = Arc::new(MemoryObjectStore::new());
    let repo = Arc::new(BundleRepository::new(store));
    repo.store(Role::Champion, &bundle(pairs[0].0, pairs[0].1, 0.8))
        .await
        .unwrap();
    let service =
        Arc::new(InferenceService::start(repo.clone(), Arc::new(ServingMetrics::new())).await);

    let mut readers = Vec::new();
    for _ in 0..4 {
        let service = service.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..2_000 {
                let result = service.predict(&[1.0; 30]).unwrap();
                let matched = pairs.iter().any(|(p, t)| {
                    (result.probability - p).abs() < 1e-9 && (result.threshold - t).abs() < 1e-12
                });
                assert!(matched, "mixed bundle: {:?}", result);
                tokio::task::yield_now().await;
            }
        }));
    }

    for i in 0..20 {
        let (p, t) = pairs[(i + 1) % 2];
        repo.store(Role::Champion, &bundle(p, t, 0.8)).await.unwrap();
        service.reload().await.unwrap();
    }

    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(service.metrics().snapshot().predictions_served, 8_000);
}

/// Memory store whose champion writes can be made to stall
#[derive(Default)]
struct StallingStore {
    inner: MemoryObjectStore,
    /// Delay in ms before the champion `HEAD` pointer is written
    head_put_ms: AtomicU64,
    /// Delay in ms before any champion object is deleted
    delete_ms: AtomicU64,
}

impl StallingStore {
    fn stall_head_puts(&self, ms: u64) {
        self.head_put_ms.store(ms, Ordering::SeqCst);
    }

    fn stall_deletes(&self, ms: u64) {
        self.delete_ms.store(ms, Ordering::SeqCst);
    }

    async fn pause(delay: &AtomicU64) {
        let ms = delay.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl ObjectStore for StallingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), StoreError> {
        if key == "champion/HEAD" {
            Self::pause(&self.head_put_ms).await;
        }
        self.inner.put(key, data).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if key.starts_with("champion/") {
            Self::pause(&self.delete_ms).await;
        }
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list(prefix).await
    }

    fn describe(&self) -> String {
        format!("stalling {}", self.inner.describe())
    }
}

async fn stalling_harness() -> (Arc<StallingStore>, Arc<BundleRepository>, Arc<InferenceService>) {
    let store = Arc::new(StallingStore::default());
    let repo = Arc::new(BundleRepository::new(store.clone()));
    repo.store(Role::Champion, &bundle(0.4, 0.5, 0.80)).await.unwrap();
    let service =
        Arc::new(InferenceService::start(repo.clone(), Arc::new(ServingMetrics::new())).await);
    (store, repo, service)
}

fn short_promotion(
    repo: &Arc<BundleRepository>,
    service: &Arc<InferenceService>,
) -> DeploymentOrchestrator {
    DeploymentOrchestrator::new(repo.clone(), Arc::new(strong_candidate()))
        .with_notifier(service.clone() as Arc<dyn ReloadNotifier>)
        .with_timeouts(Duration::from_secs(5), Duration::from_millis(50))
}

#[tokio::test]
async fn promotion_timing_out_after_commit_still_reloads() {
    let (store, repo, service) = stalling_harness().await;
    let old_version = service.status().model_version.unwrap();

    // HEAD flips, then cleanup of the old champion outlasts the timeout
    store.stall_deletes(300);
    let report = short_promotion(&repo, &service).run_cycle().await.unwrap();

    let CycleOutcome::Promoted { version, reload } = report.outcome else {
        panic!("expected promotion, got {:?}", report.outcome);
    };
    assert!(matches!(reload, ReloadStatus::Reloaded(_)));
    assert_ne!(version, old_version);
    assert_eq!(repo.fetch(Role::Champion).await.unwrap().version, version);
    assert_eq!(service.status().model_version.as_deref(), Some(version.as_str()));
    assert!(!repo.contains(Role::Candidate).await.unwrap());
}

#[tokio::test]
async fn promotion_timing_out_before_commit_leaves_no_orphans() {
    let (store, repo, service) = stalling_harness().await;
    let before = service.status();

    // components land, the HEAD write never completes in time
    store.stall_head_puts(300);
    let err = short_promotion(&repo, &service).run_cycle().await.unwrap_err();
    assert!(matches!(err, CycleError::Timeout { .. }));
    assert!(!err.is_committed());
    assert_eq!(repo.version(Role::Champion).await.unwrap(), before.model_version);
    assert_eq!(service.status(), before);

    store.stall_head_puts(0);
    let report = short_promotion(&repo, &service).run_cycle().await.unwrap();
    let CycleOutcome::Promoted { version, .. } = report.outcome else {
        panic!("expected promotion, got {:?}", report.outcome);
    };

    // HEAD plus the four components of the new champion, nothing staged
    let champion_keys: Vec<_> = store
        .inner
        .keys()
        .into_iter()
        .filter(|k| k.starts_with("champion/"))
        .collect();
    assert_eq!(champion_keys.len(), 5, "{:?}", champion_keys);
    assert!(champion_keys
        .iter()
        .all(|k| k == "champion/HEAD" || k.starts_with(&format!("champion/{}/", version))));
}
