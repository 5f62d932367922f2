//! Error taxonomy for the serving and promotion paths

use crate::repository::Role;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by an object store backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend could not be reached, or retries were exhausted
    #[error("object store unavailable: {0}")]
    Unavailable(String),

    /// Local filesystem failure
    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Key escapes the store root or is otherwise malformed
    #[error("invalid object key: {0}")]
    InvalidKey(String),
}

/// Failures reported by the artifact repository
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("no artifact set stored for role {0}")]
    NotFound(Role),

    #[error("artifact set for role {role} is incomplete: missing {component}")]
    IncompleteArtifact { role: Role, component: String },

    #[error("artifact {key} could not be decoded: {reason}")]
    InvalidArtifact { key: String, reason: String },

    #[error("repository unavailable: {0}")]
    Unavailable(#[from] StoreError),
}

/// A bundle whose components do not fit together
#[derive(Debug, Error, PartialEq)]
pub enum BundleError {
    #[error("threshold {0} is outside [0, 1]")]
    Threshold(f64),

    #[error("quality score {0} is outside (0, 1]")]
    QualityScore(f64),

    #[error("bundle takes {actual} features but transactions carry {expected}")]
    FeatureCount { expected: usize, actual: usize },

    #[error("transform emits {transform} features but classifier expects {classifier}")]
    FeatureMismatch { transform: usize, classifier: usize },
}

/// Invalid calibration input
#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    #[error("invalid calibration input: {0}")]
    InvalidInput(String),
}

/// Errors surfaced by the inference service
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("model unavailable: no bundle is loaded")]
    ModelUnavailable,

    #[error("reload failed: {0}")]
    Reload(#[from] RepositoryError),

    #[error("champion bundle expects {actual} features, service requires {expected}")]
    IncompatibleBundle { expected: usize, actual: usize },

    #[error("reload timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure to tell the serving side to adopt the new champion
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("reload endpoint unreachable: {0}")]
    Transport(String),

    #[error("reload endpoint answered {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("reload notification timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Reasons a promotion cycle did not complete cleanly
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("training failed: {0:#}")]
    Training(anyhow::Error),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error("candidate bundle rejected: {0}")]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("{phase} timed out after {timeout:?}")]
    Timeout { phase: &'static str, timeout: Duration },

    /// The repository now holds the new champion but the live service has
    /// not adopted it. Repository state is authoritative; a later reload
    /// resolves it.
    #[error("champion {version} committed but reload failed: {source}")]
    PromotionInconsistency {
        version: String,
        #[source]
        source: NotifyError,
    },
}

impl CycleError {
    /// True when the champion in the repository changed despite the error
    pub fn is_committed(&self) -> bool {
        matches!(self, CycleError::PromotionInconsistency { .. })
    }
}
