//! Source of freshly trained candidates
//!
//! Training itself happens elsewhere. The orchestrator only needs a fitted
//! classifier and transform plus held-out labels and probabilities produced
//! by that same pair.

use crate::models::codec;
use crate::models::{Classifier, FeatureTransform};
use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use tracing::info;

/// Output of one training run
#[derive(Debug, Clone)]
pub struct TrainedCandidate {
    pub classifier: Arc<dyn Classifier>,
    pub transform: Arc<dyn FeatureTransform>,
    /// Held-out labels in {0, 1}
    pub holdout_labels: Vec<u8>,
    /// Fraud probabilities for the held-out rows, from this classifier + transform
    pub holdout_probabilities: Vec<f64>,
}

#[async_trait]
pub trait CandidateTrainer: Send + Sync {
    async fn train(&self) -> Result<TrainedCandidate>;

    /// Whether `train` would produce a candidate that has not been evaluated yet.
    async fn has_pending(&self) -> Result<bool> {
        Ok(true)
    }

    /// Called once the last trained candidate was promoted or discarded.
    fn mark_evaluated(&self) {}
}

/// Held-out rows exported next to the fitted components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldoutSet {
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<u8>,
}

const EXPORT_FILES: [&str; 3] = ["classifier.json", "transform.json", "holdout.json"];

/// Size and modification time of every exported file
type ExportStamp = Vec<(u64, Option<SystemTime>)>;

/// Reads a candidate exported by an offline training job.
///
/// The export directory holds `classifier.json`, `transform.json` and
/// `holdout.json`. The hold-out rows are scored here, with the exported
/// components, so the probabilities always match the bundle being calibrated.
///
/// An export that was already promoted or discarded is not offered again
/// until one of its files changes.
#[derive(Debug)]
pub struct ExportedCandidate {
    dir: PathBuf,
    /// Stamp of the export read by the last `train`
    trained: Mutex<Option<ExportStamp>>,
    /// Stamp of the last export whose cycle reached a verdict
    evaluated: Mutex<Option<ExportStamp>>,
}

impl ExportedCandidate {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            trained: Mutex::new(None),
            evaluated: Mutex::new(None),
        }
    }

    async fn stamp(&self) -> Result<ExportStamp> {
        let mut stamp = Vec::with_capacity(EXPORT_FILES.len());
        for name in EXPORT_FILES {
            let path = self.dir.join(name);
            let meta = tokio::fs::metadata(&path)
                .await
                .with_context(|| format!("Failed to stat candidate export {}", path.display()))?;
            stamp.push((meta.len(), meta.modified().ok()));
        }
        Ok(stamp)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.dir.join(name);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read candidate export {}", path.display()))
    }
}

#[async_trait]
impl CandidateTrainer for ExportedCandidate {
    async fn train(&self) -> Result<TrainedCandidate> {
        let stamp = self.stamp().await.ok();
        let classifier = codec::decode_classifier(&self.read("classifier.json").await?)
            .context("Invalid classifier.json")?;
        let transform = codec::decode_transform(&self.read("transform.json").await?)
            .context("Invalid transform.json")?;
        let holdout: HoldoutSet =
            serde_json::from_slice(&self.read("holdout.json").await?).context("Invalid holdout.json")?;

        ensure!(
            holdout.features.len() == holdout.labels.len(),
            "holdout has {} rows but {} labels",
            holdout.features.len(),
            holdout.labels.len()
        );
        let width = transform.n_features();
        if let Some(row) = holdout.features.iter().position(|r| r.len() != width) {
            anyhow::bail!("holdout row {} does not have {} features", row, width);
        }

        let holdout_probabilities = holdout
            .features
            .iter()
            .map(|row| {
                classifier
                    .predict_probability(&transform.apply(row))
                    .clamp(0.0, 1.0)
            })
            .collect();

        info!(
            dir = %self.dir.display(),
            rows = holdout.labels.len(),
            "Loaded exported candidate"
        );
        *self.trained.lock().unwrap_or_else(PoisonError::into_inner) = stamp;

        Ok(TrainedCandidate {
            classifier,
            transform,
            holdout_labels: holdout.labels,
            holdout_probabilities,
        })
    }

    async fn has_pending(&self) -> Result<bool> {
        // a missing or unreadable export is left for `train` to report
        let Ok(current) = self.stamp().await else {
            return Ok(true);
        };
        let evaluated = self.evaluated.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(evaluated.as_ref() != Some(&current))
    }

    fn mark_evaluated(&self) {
        let trained = self.trained.lock().unwrap_or_else(PoisonError::into_inner).take();
        if trained.is_some() {
            *self.evaluated.lock().unwrap_or_else(PoisonError::into_inner) = trained;
        }
    }
}
