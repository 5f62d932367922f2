//! Inference service and its HTTP surface

pub mod http;
pub mod service;

pub use http::{router, AppState};
pub use service::{InferenceService, LiveModel, ReloadSummary, ServiceStatus};
