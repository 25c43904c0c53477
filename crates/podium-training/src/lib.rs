//! Podium Training
//!
//! Backend-agnostic primitives for the detection-model pipeline:
//! - Fetching, validating and splitting an annotated dataset
//! - Describing training runs (`TrainRequest`) and training backends (`Trainer`)
//! - Tracking runs, metrics and artifacts (`ExperimentTracker`)
//! - Registering model versions and promoting a Champion (`ModelRegistry`)

pub mod artifacts;
pub mod dataset;
pub mod error;
pub mod fetch;
pub mod job;
pub mod layout;
pub mod progress;
pub mod promote;
pub mod registry;
pub mod split;
pub mod system;
pub mod tracking;
pub mod trainer;
pub mod validate;

pub use dataset::{ClassNames, DatasetPart, SamplePair, Subset, TrainingConfig};
pub use error::{
    FetchError, PromotionError, SplitError, TrainingError, TrainingResult, ValidationError, ValidationErrorKind,
};
pub use fetch::{fetch_dataset, DatasetPlatform, FetchReport};
pub use job::{HyperParams, TrainRequest};
pub use layout::{DatasetLayout, TrackingLayout};
pub use progress::{LogProgressSink, ProgressEvent, ProgressSink};
pub use promote::{lookup_champion, promote_latest_run, ChampionLookup, PromotionOutcome, PromotionPolicy};
pub use registry::{FileRegistry, ModelRegistry, ModelVersion, CHALLENGER, CHAMPION};
pub use split::{
    plan_split, recover_interrupted_commit, split_dataset, CommitRecovery, SplitAssignment, SplitOptions, SplitReport,
};
pub use system::SystemMonitor;
pub use tracking::{ExperimentTracker, FileTracker, MetricPoint, RunGuard, RunId, RunRecord, RunStatus};
pub use trainer::{run_training, TrainOutcome, Trainer};
pub use validate::{lint_labels, validate_dataset, ValidationReport};
