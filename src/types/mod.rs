//! Request and response types

pub mod prediction;
pub mod transaction;

pub use prediction::{Label, PredictionResult};
pub use transaction::{Transaction, FEATURE_COUNT};
