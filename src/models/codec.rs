//! Persisted form of bundle components
//!
//! Each component is a small JSON document. Estimators carry a `kind` tag so
//! new formats can be added without touching the repository layout.

use crate::models::estimator::{
    Classifier, FeatureTransform, IdentityTransform, LogisticRegression, StandardScaler,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Tagged classifier component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierArtifact {
    LogisticRegression(LogisticRegression),
}

impl ClassifierArtifact {
    pub fn into_classifier(self) -> Arc<dyn Classifier> {
        match self {
            ClassifierArtifact::LogisticRegression(model) => Arc::new(model),
        }
    }
}

/// Tagged feature-transform component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformArtifact {
    StandardScaler(StandardScaler),
    Identity(IdentityTransform),
}

impl TransformArtifact {
    pub fn into_transform(self) -> Arc<dyn FeatureTransform> {
        match self {
            TransformArtifact::StandardScaler(scaler) => Arc::new(scaler),
            TransformArtifact::Identity(identity) => Arc::new(identity),
        }
    }
}

/// Scalar components (threshold, quality score) are stored as `{"value": x}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalarArtifact {
    pub value: f64,
}

pub fn encode<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec_pretty(value)
}

pub fn decode_classifier(bytes: &[u8]) -> serde_json::Result<Arc<dyn Classifier>> {
    serde_json::from_slice::<ClassifierArtifact>(bytes).map(ClassifierArtifact::into_classifier)
}

pub fn decode_transform(bytes: &[u8]) -> serde_json::Result<Arc<dyn FeatureTransform>> {
    serde_json::from_slice::<TransformArtifact>(bytes).map(TransformArtifact::into_transform)
}

pub fn decode_scalar(bytes: &[u8]) -> serde_json::Result<f64> {
    serde_json::from_slice::<ScalarArtifact>(bytes).map(|s| s.value)
}
