//! Decision-threshold calibration by F1 grid search

use crate::error::CalibrationError;
use serde::Serialize;

/// Default number of thresholds scanned over [0, 1]
pub const DEFAULT_STEPS: usize = 100;

/// Threshold chosen by calibration and the F1 it achieves
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Calibration {
    pub threshold: f64,
    pub f1: f64,
}

/// Confusion-matrix summary at one threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub threshold: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of positive labels
    pub support: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ThresholdCalibrator {
    steps: usize,
}

impl Default for ThresholdCalibrator {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS,
        }
    }
}

impl ThresholdCalibrator {
    pub fn new(steps: usize) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Scan `steps` evenly spaced thresholds over [0, 1] (inclusive) and keep
    /// the one with the highest F1. Ties go to the smallest threshold.
    pub fn calibrate(
        &self,
        labels: &[u8],
        probabilities: &[f64],
    ) -> Result<Calibration, CalibrationError> {
        validate(labels, probabilities)?;
        if self.steps == 0 {
            return Err(CalibrationError::InvalidInput(
                "at least one threshold step is required".to_string(),
            ));
        }

        let mut best = Calibration {
            threshold: 0.0,
            f1: f64::NEG_INFINITY,
        };
        for i in 0..self.steps {
            let threshold = if self.steps == 1 {
                0.0
            } else {
                i as f64 / (self.steps - 1) as f64
            };
            let f1 = Counts::at(labels, probabilities, threshold).f1();
            if f1 > best.f1 {
                best = Calibration { threshold, f1 };
            }
        }
        Ok(best)
    }
}

/// Precision, recall and F1 of `probability >= threshold` against `labels`.
pub fn evaluate(
    labels: &[u8],
    probabilities: &[f64],
    threshold: f64,
) -> Result<ClassificationReport, CalibrationError> {
    validate(labels, probabilities)?;
    let counts = Counts::at(labels, probabilities, threshold);
    Ok(ClassificationReport {
        threshold,
        precision: ratio(counts.tp, counts.tp + counts.fp),
        recall: ratio(counts.tp, counts.tp + counts.fn_),
        f1: counts.f1(),
        support: counts.tp + counts.fn_,
        true_positives: counts.tp,
        false_positives: counts.fp,
        false_negatives: counts.fn_,
    })
}

fn validate(labels: &[u8], probabilities: &[f64]) -> Result<(), CalibrationError> {
    if labels.is_empty() {
        return Err(CalibrationError::InvalidInput("no samples".to_string()));
    }
    if labels.len() != probabilities.len() {
        return Err(CalibrationError::InvalidInput(format!(
            "{} labels but {} probabilities",
            labels.len(),
            probabilities.len()
        )));
    }
    if let Some(label) = labels.iter().find(|&&l| l > 1) {
        return Err(CalibrationError::InvalidInput(format!(
            "label {} is not 0 or 1",
            label
        )));
    }
    if probabilities.iter().any(|p| !p.is_finite()) {
        return Err(CalibrationError::InvalidInput(
            "probabilities must be finite".to_string(),
        ));
    }
    Ok(())
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

struct Counts {
    tp: usize,
    fp: usize,
    fn_: usize,
}

impl Counts {
    fn at(labels: &[u8], probabilities: &[f64], threshold: f64) -> Self {
        let mut counts = Counts { tp: 0, fp: 0, fn_: 0 };
        for (&label, &p) in labels.iter().zip(probabilities) {
            match (label == 1, p >= threshold) {
                (true, true) => counts.tp += 1,
                (false, true) => counts.fp += 1,
                (true, false) => counts.fn_ += 1,
                (false, false) => {}
            }
        }
        counts
    }

    /// 2TP / (2TP + FP + FN), zero when undefined
    fn f1(&self) -> f64 {
        ratio(2 * self.tp, 2 * self.tp + self.fp + self.fn_)
    }
}
