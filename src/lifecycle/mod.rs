//! Model lifecycle: calibration, comparison and the promotion cycle

pub mod calibrator;
pub mod decision;
pub mod notifier;
pub mod orchestrator;
pub mod trainer;

pub use calibrator::{evaluate, Calibration, ClassificationReport, ThresholdCalibrator};
pub use decision::{decide, PromotionPolicy, Verdict};
pub use notifier::{HttpReloadNotifier, ReloadAck, ReloadNotifier};
pub use orchestrator::{CycleOutcome, CycleReport, CycleState, DeploymentOrchestrator, ReloadStatus};
pub use trainer::{CandidateTrainer, ExportedCandidate, HoldoutSet, TrainedCandidate};
