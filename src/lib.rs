//! Fraud Model Server Library
//!
//! Serves a fraud classifier over HTTP and keeps it current: freshly trained
//! candidates are calibrated, compared against the deployed champion and
//! promoted without interrupting predictions.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod repository;
pub mod serving;
pub mod types;

pub use config::AppConfig;
pub use error::{CycleError, RepositoryError, ServiceError};
pub use lifecycle::{DeploymentOrchestrator, ThresholdCalibrator};
pub use models::ModelBundle;
pub use repository::{ArtifactRepository, BundleRepository, Role};
pub use serving::InferenceService;
pub use types::Transaction;
