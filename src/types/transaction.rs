//! Inbound transaction payload

use crate::error::ServiceError;
use serde::{Deserialize, Serialize};

/// Number of raw feature values every transaction must carry
pub const FEATURE_COUNT: usize = 30;

/// A transaction to be scored, as an ordered raw feature vector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    /// Raw feature values in training column order
    pub features: Vec<f64>,
}

impl Transaction {
    pub fn new(features: Vec<f64>) -> Self {
        Self { features }
    }

    /// Check the shape of the feature vector before anything touches a model.
    pub fn validate(&self) -> Result<(), ServiceError> {
        validate_features(&self.features)
    }
}

/// Reject vectors of the wrong width or with non-finite values.
pub fn validate_features(features: &[f64]) -> Result<(), ServiceError> {
    if features.len() != FEATURE_COUNT {
        return Err(ServiceError::InvalidRequest(format!(
            "Expected {} features, got {}",
            FEATURE_COUNT,
            features.len()
        )));
    }

    if let Some(index) = features.iter().position(|v| !v.is_finite()) {
        return Err(ServiceError::InvalidRequest(format!(
            "Feature {} is not a finite number",
            index
        )));
    }

    Ok(())
}
