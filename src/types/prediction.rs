//! Prediction output

use serde::{Deserialize, Serialize};

/// Binary verdict for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Fraud,
    Legitimate,
}

impl Label {
    /// Positive class iff the probability reaches the threshold
    pub fn from_probability(probability: f64, threshold: f64) -> Self {
        if probability >= threshold {
            Label::Fraud
        } else {
            Label::Legitimate
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Fraud => "fraud",
            Label::Legitimate => "legitimate",
        }
    }
}

/// Result of scoring one transaction against one bundle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub label: Label,
    /// Fraud probability in [0, 1]
    pub probability: f64,
    /// Threshold of the bundle that produced this result
    pub threshold: f64,
    /// Version of the bundle that produced this result
    pub model_version: String,
}
