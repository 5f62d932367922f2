//! Inference service: the live bundle handle, predictions and reloads
//!
//! The live bundle sits behind a single `Arc` pointer. A prediction clones
//! the pointer once and scores against that snapshot, so a concurrent reload
//! can replace the pointer without the prediction ever seeing a mix of two
//! bundles. The old bundle is freed when its last reader drops it.

use crate::error::ServiceError;
use crate::metrics::ServingMetrics;
use crate::models::ModelBundle;
use crate::repository::{ArtifactRepository, Role};
use crate::types::transaction::validate_features;
use crate::types::{Label, PredictionResult, FEATURE_COUNT};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// The bundle currently answering predictions
#[derive(Debug)]
pub struct LiveModel {
    pub version: String,
    pub bundle: ModelBundle,
    pub loaded_at: DateTime<Utc>,
}

/// Readiness view for health checks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub ready: bool,
    pub model_version: Option<String>,
    pub threshold: Option<f64>,
    pub model_f1_score: Option<f64>,
    pub loaded_at: Option<DateTime<Utc>>,
}

/// What a successful reload installed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReloadSummary {
    pub version: String,
    pub previous_version: Option<String>,
    pub threshold: f64,
    pub quality_score: f64,
}

pub struct InferenceService {
    repository: Arc<dyn ArtifactRepository>,
    current: RwLock<Option<Arc<LiveModel>>>,
    /// Serialises reloads so a slow fetch cannot overwrite a newer one
    reload_gate: Mutex<()>,
    metrics: Arc<ServingMetrics>,
}

impl InferenceService {
    /// Create a service with no bundle loaded.
    pub fn new(repository: Arc<dyn ArtifactRepository>, metrics: Arc<ServingMetrics>) -> Self {
        Self {
            repository,
            current: RwLock::new(None),
            reload_gate: Mutex::new(()),
            metrics,
        }
    }

    /// Create the service and try to load the champion.
    ///
    /// A failed initial load is not fatal: the service comes up not ready and
    /// answers predictions with [`ServiceError::ModelUnavailable`].
    pub async fn start(repository: Arc<dyn ArtifactRepository>, metrics: Arc<ServingMetrics>) -> Self {
        let service = Self::new(repository, metrics);
        if let Err(e) = service.reload().await {
            warn!(error = %e, "Starting without a model; predictions unavailable until reload");
        }
        service
    }

    pub fn metrics(&self) -> &Arc<ServingMetrics> {
        &self.metrics
    }

    /// Current live bundle, if any. Holding the returned `Arc` pins that bundle.
    pub fn snapshot(&self) -> Option<Arc<LiveModel>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot().is_some()
    }

    pub fn status(&self) -> ServiceStatus {
        match self.snapshot() {
            Some(live) => ServiceStatus {
                ready: true,
                model_version: Some(live.version.clone()),
                threshold: Some(live.bundle.threshold()),
                model_f1_score: Some(live.bundle.quality_score()),
                loaded_at: Some(live.loaded_at),
            },
            None => ServiceStatus {
                ready: false,
                model_version: None,
                threshold: None,
                model_f1_score: None,
                loaded_at: None,
            },
        }
    }

    /// Score one transaction against a single bundle snapshot.
    pub fn predict(&self, features: &[f64]) -> Result<PredictionResult, ServiceError> {
        let start = Instant::now();

        if let Err(e) = validate_features(features) {
            self.metrics.record_rejected();
            return Err(e);
        }

        let Some(live) = self.snapshot() else {
            self.metrics.record_unavailable();
            return Err(ServiceError::ModelUnavailable);
        };

        let threshold = live.bundle.threshold();
        let probability = live.bundle.probability(features);
        let label = Label::from_probability(probability, threshold);

        self.metrics
            .record_prediction(start.elapsed(), probability, label == Label::Fraud);

        debug!(
            version = %live.version,
            probability = probability,
            label = label.as_str(),
            "Prediction served"
        );

        Ok(PredictionResult {
            label,
            probability,
            threshold,
            model_version: live.version.clone(),
        })
    }

    /// Fetch the champion and make it the live bundle.
    ///
    /// On failure the previously live bundle, if any, keeps serving.
    pub async fn reload(&self) -> Result<ReloadSummary, ServiceError> {
        let _gate = self.reload_gate.lock().await;

        let result = self.fetch_live().await;
        self.metrics.record_reload(result.is_ok());

        let live = match result {
            Ok(live) => live,
            Err(e) => {
                warn!(error = %e, "Reload failed, keeping current bundle");
                return Err(e);
            }
        };

        let live = Arc::new(live);
        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(live.clone());

        let summary = ReloadSummary {
            version: live.version.clone(),
            previous_version: previous.map(|p| p.version.clone()),
            threshold: live.bundle.threshold(),
            quality_score: live.bundle.quality_score(),
        };
        info!(
            version = %summary.version,
            previous = ?summary.previous_version,
            threshold = summary.threshold,
            quality_score = summary.quality_score,
            "Model reloaded"
        );
        Ok(summary)
    }

    /// [`Self::reload`] bounded by `timeout`. A timed-out reload leaves the
    /// live bundle unchanged.
    pub async fn reload_with_timeout(&self, timeout: Duration) -> Result<ReloadSummary, ServiceError> {
        match tokio::time::timeout(timeout, self.reload()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Reload timed out");
                Err(ServiceError::Timeout(timeout))
            }
        }
    }

    async fn fetch_live(&self) -> Result<LiveModel, ServiceError> {
        let stored = self.repository.fetch(Role::Champion).await?;
        if stored.bundle.n_features() != FEATURE_COUNT {
            return Err(ServiceError::IncompatibleBundle {
                expected: FEATURE_COUNT,
                actual: stored.bundle.n_features(),
            });
        }
        Ok(LiveModel {
            version: stored.version,
            bundle: stored.bundle,
            loaded_at: Utc::now(),
        })
    }
}
