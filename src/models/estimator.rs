//! Capability traits for fitted estimators, and the built-in implementations
//!
//! The serving and promotion code only ever talks to [`Classifier`] and
//! [`FeatureTransform`]. Concrete estimators persist themselves through
//! [`crate::models::codec`].

use crate::models::codec::{ClassifierArtifact, TransformArtifact};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A fitted binary classifier
pub trait Classifier: Send + Sync + fmt::Debug {
    /// Probability of the positive (fraud) class for already-transformed features.
    fn predict_probability(&self, features: &[f64]) -> f64;

    /// Width of the feature vector the classifier was fit on
    fn n_features(&self) -> usize;

    /// Persistable form of this classifier
    fn to_artifact(&self) -> ClassifierArtifact;
}

/// A feature transform fitted on training data only.
///
/// Serving applies it; nothing at serving time refits it.
pub trait FeatureTransform: Send + Sync + fmt::Debug {
    fn apply(&self, raw: &[f64]) -> Vec<f64>;

    /// Width of the raw input, which is also the output width
    fn n_features(&self) -> usize;

    fn to_artifact(&self) -> TransformArtifact;
}

/// Logistic regression over a dense feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LogisticRegression {
    pub fn new(coefficients: Vec<f64>, intercept: f64) -> Self {
        Self {
            coefficients,
            intercept,
        }
    }

    /// Classifier that ignores its input and always answers `probability`.
    pub fn constant(n_features: usize, probability: f64) -> Self {
        let p = probability.clamp(1e-12, 1.0 - 1e-12);
        Self {
            coefficients: vec![0.0; n_features],
            intercept: (p / (1.0 - p)).ln(),
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

impl Classifier for LogisticRegression {
    fn predict_probability(&self, features: &[f64]) -> f64 {
        let z = self
            .coefficients
            .iter()
            .zip(features)
            .fold(self.intercept, |acc, (w, x)| acc + w * x);
        sigmoid(z)
    }

    fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    fn to_artifact(&self) -> ClassifierArtifact {
        ClassifierArtifact::LogisticRegression(self.clone())
    }
}

/// Per-column standardisation, `(x - mean) / scale`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit on training rows. Columns with zero variance get a unit scale.
    pub fn fit(rows: &[Vec<f64>]) -> Option<Self> {
        let width = rows.first()?.len();
        if width == 0 || rows.iter().any(|r| r.len() != width) {
            return None;
        }

        let n = rows.len() as f64;
        let mut mean = vec![0.0; width];
        for row in rows {
            for (m, x) in mean.iter_mut().zip(row) {
                *m += x / n;
            }
        }

        let mut scale = vec![0.0; width];
        for row in rows {
            for ((s, x), m) in scale.iter_mut().zip(row).zip(&mean) {
                *s += (x - m).powi(2) / n;
            }
        }
        for s in scale.iter_mut() {
            *s = if *s > 0.0 { s.sqrt() } else { 1.0 };
        }

        Some(Self { mean, scale })
    }
}

impl FeatureTransform for StandardScaler {
    fn apply(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }

    fn n_features(&self) -> usize {
        self.mean.len()
    }

    fn to_artifact(&self) -> TransformArtifact {
        TransformArtifact::StandardScaler(self.clone())
    }
}

/// Pass-through transform for models trained on raw features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityTransform {
    pub n_features: usize,
}

impl FeatureTransform for IdentityTransform {
    fn apply(&self, raw: &[f64]) -> Vec<f64> {
        raw.to_vec()
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn to_artifact(&self) -> TransformArtifact {
        TransformArtifact::Identity(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logistic_probability_bounds() {
        let model = LogisticRegression::new(vec![1000.0, -1000.0], 0.0);

        let high = model.predict_probability(&[10.0, -10.0]);
        let low = model.predict_probability(&[-10.0, 10.0]);
        assert!((0.0..=1.0).contains(&high));
        assert!((0.0..=1.0).contains(&low));
        assert!(high > 0.99);
        assert!(low < 0.01);
    }

    #[test]
    fn test_constant_classifier() {
        let model = LogisticRegression::constant(30, 0.25);
        let p = model.predict_probability(&[3.0; 30]);
        assert!((p - 0.25).abs() < 1e-9);
        assert_eq!(model.n_features(), 30);
    }

    #[test]
    fn test_scaler_fit_and_apply() {
        let rows = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let scaler = StandardScaler::fit(&rows).unwrap();

        assert_eq!(scaler.mean, vec![2.0, 5.0]);
        // constant column keeps a unit scale
        assert_eq!(scaler.scale, vec![1.0, 1.0]);
        assert_eq!(scaler.apply(&[3.0, 7.0]), vec![1.0, 2.0]);
    }

    #[test]
    fn test_scaler_rejects_ragged_rows() {
        assert!(StandardScaler::fit(&[vec![1.0], vec![1.0, 2.0]]).is_none());
        assert!(StandardScaler::fit(&[]).is_none());
    }
}
