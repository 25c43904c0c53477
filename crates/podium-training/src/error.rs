use crate::dataset::DatasetPart;
use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid training request: {0}")]
    InvalidSpec(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Promotion(#[from] PromotionError),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("trainer error: {0}")]
    Trainer(String),

    #[error("tracking error: {0}")]
    Tracking(String),

    #[error("run {0} is closed")]
    RunClosed(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse class of a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// A required directory is absent or empty.
    MissingData,
    /// Image and label sets disagree in size or identity.
    Mismatch,
    /// A label file is malformed.
    LabelFormat,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("the {part} directory is missing: {}", path.display())]
    MissingDirectory { part: DatasetPart, path: PathBuf },

    #[error("the {part} directory is empty: {}", path.display())]
    EmptyDirectory { part: DatasetPart, path: PathBuf },

    #[error("the number of images ({images}) and labels ({labels}) differ")]
    CountMismatch { images: usize, labels: usize },

    #[error(
        "mismatch between image files and label files ({} image(s) without label, {} label(s) without image)",
        images_only.len(),
        labels_only.len()
    )]
    StemMismatch { images_only: Vec<String>, labels_only: Vec<String> },

    #[error("{}:{line}: {reason}", file.display())]
    LabelFormat { file: PathBuf, line: usize, reason: String },
}

impl ValidationError {
    #[must_use]
    pub fn kind(&self) -> ValidationErrorKind {
        match self {
            Self::MissingDirectory { .. } | Self::EmptyDirectory { .. } => ValidationErrorKind::MissingData,
            Self::CountMismatch { .. } | Self::StemMismatch { .. } => ValidationErrorKind::Mismatch,
            Self::LabelFormat { .. } => ValidationErrorKind::LabelFormat,
        }
    }
}

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("{name} must be strictly between 0 and 1, got {value}")]
    FractionRange { name: &'static str, value: f64 },

    #[error("test_size + val_size must be < 1, got {test_size} + {val_size}")]
    FractionSum { test_size: f64, val_size: f64 },

    #[error("at least 3 sample pairs are required to split, found {count}")]
    TooFewSamples { count: usize },

    #[error("class manifest not found: {}", .0.display())]
    MissingManifest(PathBuf),

    #[error("class indices must be contiguous from 0, got {0:?}")]
    NonContiguousClasses(Vec<u32>),

    #[error("staged {subset} split has {found} file(s) in {}, expected {expected}", dir.display())]
    Verification { subset: &'static str, dir: PathBuf, expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("dataset platform rejected the credentials: {0}")]
    Unauthorized(String),

    #[error("dataset platform request failed: {0}")]
    Remote(String),

    #[error("invalid annotation bundle: {0}")]
    Bundle(String),

    #[error("annotation bundle did not contain a class manifest (expected {})", .0.display())]
    MissingManifest(PathBuf),

    #[error("refusing to clean {}: it holds {entry:?}, which is not part of a dataset directory", root.display())]
    ForeignEntry { root: PathBuf, entry: String },
}

#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("no completed training run found to promote")]
    NoActiveRun,

    #[error("run {0} has no weights artifact")]
    MissingWeights(String),

    #[error("run {run_id} has no value for metric {metric}")]
    MissingMetric { run_id: String, metric: String },

    #[error("model {name} version {version} holds the Champion alias but its {metric} cannot be read")]
    ChampionMetricUnavailable { name: String, version: u32, metric: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_kinds() {
        let missing = ValidationError::MissingDirectory {
            part: DatasetPart::Images,
            path: PathBuf::from("data/images"),
        };
        assert_eq!(missing.kind(), ValidationErrorKind::MissingData);

        let counts = ValidationError::CountMismatch { images: 3, labels: 2 };
        assert_eq!(counts.kind(), ValidationErrorKind::Mismatch);
        assert!(counts.to_string().contains("(3)"));
    }

    #[test]
    fn test_validation_error_wraps_into_training_error() {
        let err: TrainingError =
            ValidationError::EmptyDirectory { part: DatasetPart::Labels, path: PathBuf::from("l") }.into();
        assert!(err.to_string().contains("labels directory is empty"));
    }
}
