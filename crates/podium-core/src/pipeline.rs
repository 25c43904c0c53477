//! Sequential pipeline: Fetch → Validate → Split → Train → Promote.
//!
//! Every stage returns a `Result`; the first failure stops the run and is
//! tagged with the [`Stage`] that produced it, which also selects the process
//! exit code.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use podium_training::dataset::read_class_manifest;
use podium_training::{
    fetch_dataset, lint_labels, promote_latest_run, run_training, split_dataset, validate_dataset, DatasetLayout,
    DatasetPlatform, FetchReport, FileRegistry, FileTracker, LogProgressSink, ModelRegistry, ProgressSink,
    PromotionOutcome, RunRecord, SplitReport, TrainRequest, Trainer, CHAMPION,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::CoreError;
use crate::platform::PlatformClient;
use crate::training::CommandTrainer;

/// A pipeline step, used to tag failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Fetch,
    Validate,
    Split,
    Train,
    Promote,
    Serve,
}

impl Stage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Fetch => "fetch",
            Self::Validate => "validate",
            Self::Split => "split",
            Self::Train => "train",
            Self::Promote => "promote",
            Self::Serve => "serve",
        }
    }

    /// Process exit code for a failure in this stage.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Fetch => 1,
            Self::Validate => 2,
            Self::Split => 3,
            Self::Train => 4,
            Self::Promote => 5,
            Self::Config => 6,
            Self::Serve => 7,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage failure.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: CoreError,
}

impl PipelineError {
    pub fn new(stage: Stage, source: impl Into<CoreError>) -> Self {
        Self { stage, source: source.into() }
    }

    /// Configuration problems exit with the configuration code whichever
    /// stage noticed them.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self.source {
            CoreError::Config(_) => Stage::Config.exit_code(),
            _ => self.stage.exit_code(),
        }
    }
}

fn at<E: Into<CoreError>>(stage: Stage) -> impl FnOnce(E) -> PipelineError {
    move |e| PipelineError::new(stage, e)
}

/// Structural validation result plus label lint count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSummary {
    pub pairs: usize,
    /// Boxes checked by the label lint; `None` when no class manifest was found.
    pub boxes: Option<usize>,
}

/// Per-stage results of a full run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub fetch: FetchReport,
    pub validation: ValidationSummary,
    pub split: SplitReport,
    pub run: RunRecord,
    pub promotion: PromotionOutcome,
}

/// The collaborators each stage needs, built once from [`Settings`].
pub struct Pipeline<'a> {
    settings: &'a Settings,
    layout: DatasetLayout,
    platform: Arc<dyn DatasetPlatform>,
    trainer: Arc<dyn Trainer>,
    tracker: FileTracker,
    registry: FileRegistry,
    progress: Arc<dyn ProgressSink>,
}

impl<'a> Pipeline<'a> {
    /// Wire the default collaborators: HTTP platform client, subprocess
    /// trainer, file-backed tracker and registry.
    pub fn from_settings(settings: &'a Settings) -> Result<Self, PipelineError> {
        settings.validate().map_err(at(Stage::Config))?;
        let platform = PlatformClient::new(&settings.platform)
            .map_err(|e| PipelineError::new(Stage::Config, CoreError::Config(e.to_string())))?;

        Ok(Self {
            settings,
            layout: DatasetLayout::new(&settings.data.path),
            platform: Arc::new(platform),
            trainer: Arc::new(CommandTrainer::from_settings(&settings.training)),
            tracker: FileTracker::new(&settings.tracking.root),
            registry: FileRegistry::new(&settings.tracking.root),
            progress: Arc::new(LogProgressSink),
        })
    }

    #[must_use]
    pub fn with_platform(mut self, platform: Arc<dyn DatasetPlatform>) -> Self {
        self.platform = platform;
        self
    }

    #[must_use]
    pub fn with_trainer(mut self, trainer: Arc<dyn Trainer>) -> Self {
        self.trainer = trainer;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn tracker(&self) -> &FileTracker {
        &self.tracker
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    pub async fn fetch(&self) -> Result<FetchReport, PipelineError> {
        self.settings.validate_platform().map_err(at(Stage::Fetch))?;
        fetch_dataset(self.platform.as_ref(), &self.settings.platform.dataset_id, &self.layout)
            .await
            .map_err(at(Stage::Fetch))
    }

    pub fn validate(&self) -> Result<ValidationSummary, PipelineError> {
        let report = validate_dataset(&self.layout).map_err(at(Stage::Validate))?;

        let manifest = self.layout.class_manifest_path();
        let boxes = if manifest.exists() {
            let names = read_class_manifest(&manifest).map_err(at(Stage::Validate))?;
            Some(lint_labels(&self.layout.labels_dir(), &names).map_err(at(Stage::Validate))?)
        } else {
            warn!(path = %manifest.display(), "no class manifest; label lint skipped");
            None
        };

        info!(pairs = report.pairs, boxes = ?boxes, "dataset valid");
        Ok(ValidationSummary { pairs: report.pairs, boxes })
    }

    pub fn split(&self) -> Result<SplitReport, PipelineError> {
        split_dataset(&self.layout, &self.settings.data.split_options()).map_err(at(Stage::Split))
    }

    /// Train inside a tracked run, attaching the dependency manifest and the
    /// training config.
    pub async fn train(&self) -> Result<RunRecord, PipelineError> {
        let training = &self.settings.training;
        let config_path = self.settings.training_config_path();
        let request = TrainRequest::new(&training.pretrained_model, &config_path, training.hyperparams())
            .with_system_metrics(training.system_metrics_interval());

        let mut attachments = Vec::new();
        if training.requirements_path.is_file() {
            attachments.push(("environment".to_string(), training.requirements_path.clone()));
        } else {
            warn!(
                path = %training.requirements_path.display(),
                "dependency manifest not found; environment artifact skipped"
            );
        }
        attachments.push(("dataset".to_string(), config_path));

        let record = run_training(
            self.trainer.as_ref(),
            &self.tracker,
            &request,
            &attachments,
            self.progress.as_ref(),
        )
        .await
        .map_err(at(Stage::Train))?;
        info!(run = %record.run_name, run_id = %record.run_id, "training run finished");
        Ok(record)
    }

    pub fn promote(&self) -> Result<PromotionOutcome, PipelineError> {
        promote_latest_run(&self.tracker, &self.registry, &self.settings.promotion.policy()).map_err(at(Stage::Promote))
    }

    /// Run every stage in order, stopping at the first failure.
    pub async fn run(&self) -> Result<PipelineReport, PipelineError> {
        info!(dataset_id = %self.settings.platform.dataset_id, data = %self.layout.root().display(), "pipeline started");
        let fetch = self.fetch().await?;
        let validation = self.validate()?;
        let split = self.split()?;
        let run = self.train().await?;
        let promotion = self.promote()?;
        info!(version = promotion.version().version, "pipeline finished");
        Ok(PipelineReport { fetch, validation, split, run, promotion })
    }

    /// Weights to serve: `serve.model_path` when set, else the current
    /// Champion's registered copy.
    pub fn serving_model(&self) -> Result<PathBuf, PipelineError> {
        if let Some(path) = &self.settings.serve.model_path {
            return Ok(path.clone());
        }
        let name = &self.settings.promotion.model_name;
        self.registry
            .version_by_alias(name, CHAMPION)
            .map_err(at(Stage::Serve))?
            .map(|version| version.source)
            .ok_or_else(|| {
                PipelineError::new(
                    Stage::Serve,
                    CoreError::Config(format!("serve.model_path is not set and model {name:?} has no Champion")),
                )
            })
    }
}
