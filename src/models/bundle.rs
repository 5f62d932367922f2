//! The deployable unit: classifier, transform, threshold and quality score

use crate::error::BundleError;
use crate::models::estimator::{Classifier, FeatureTransform};
use std::fmt;
use std::sync::Arc;

/// A complete, mutually consistent set of model components.
///
/// Bundles are immutable once built; serving swaps whole bundles.
#[derive(Clone)]
pub struct ModelBundle {
    classifier: Arc<dyn Classifier>,
    transform: Arc<dyn FeatureTransform>,
    threshold: f64,
    quality_score: f64,
}

impl ModelBundle {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        transform: Arc<dyn FeatureTransform>,
        threshold: f64,
        quality_score: f64,
    ) -> Result<Self, BundleError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(BundleError::Threshold(threshold));
        }
        // a zero score means the classifier never found a positive
        if !(quality_score > 0.0 && quality_score <= 1.0) {
            return Err(BundleError::QualityScore(quality_score));
        }
        if transform.n_features() != classifier.n_features() {
            return Err(BundleError::FeatureMismatch {
                transform: transform.n_features(),
                classifier: classifier.n_features(),
            });
        }

        Ok(Self {
            classifier,
            transform,
            threshold,
            quality_score,
        })
    }

    pub fn classifier(&self) -> &Arc<dyn Classifier> {
        &self.classifier
    }

    pub fn transform(&self) -> &Arc<dyn FeatureTransform> {
        &self.transform
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn quality_score(&self) -> f64 {
        self.quality_score
    }

    /// Raw feature width this bundle accepts
    pub fn n_features(&self) -> usize {
        self.transform.n_features()
    }

    /// Transform then classify, clamped to [0, 1].
    pub fn probability(&self, raw: &[f64]) -> f64 {
        let transformed = self.transform.apply(raw);
        self.classifier
            .predict_probability(&transformed)
            .clamp(0.0, 1.0)
    }
}

impl fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBundle")
            .field("classifier", &self.classifier)
            .field("transform", &self.transform)
            .field("threshold", &self.threshold)
            .field("quality_score", &self.quality_score)
            .finish()
    }
}

/// A bundle together with the repository version it was read from
#[derive(Debug, Clone)]
pub struct StoredBundle {
    pub version: String,
    pub bundle: ModelBundle,
}
