use crate::dataset::Subset;
use crate::error::TrainingResult;
use crate::tracking::RunId;
use std::path::{Path, PathBuf};

/// Filesystem layout of a dataset working directory.
///
/// Before splitting, samples live flat in `images/` and `labels/` next to the
/// exported `data.yaml`. After splitting, each holds `train/`, `val/` and
/// `test/` subdirectories and `config.yaml` replaces `data.yaml`.
#[derive(Debug, Clone)]
pub struct DatasetLayout {
    root: PathBuf,
}

impl DatasetLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    #[must_use]
    pub fn labels_dir(&self) -> PathBuf {
        self.root.join("labels")
    }

    #[must_use]
    pub fn images_subset_dir(&self, subset: Subset) -> PathBuf {
        self.images_dir().join(subset.as_str())
    }

    #[must_use]
    pub fn labels_subset_dir(&self, subset: Subset) -> PathBuf {
        self.labels_dir().join(subset.as_str())
    }

    /// Class manifest as exported by the dataset platform.
    #[must_use]
    pub fn class_manifest_path(&self) -> PathBuf {
        self.root.join("data.yaml")
    }

    /// Consolidated training config written by the splitter.
    #[must_use]
    pub fn training_config_path(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    /// Scratch directory the annotation export is downloaded into.
    #[must_use]
    pub fn export_dir(&self) -> PathBuf {
        self.root.join(".export")
    }

    /// Staging area the splitter copies into before committing.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(".split-staging")
    }

    /// Where the flat directories are parked during the split commit.
    #[must_use]
    pub fn retired_dir(&self) -> PathBuf {
        self.root.join(".split-retired")
    }

    /// Names of every entry the pipeline itself creates directly under the root.
    pub const MANAGED_ENTRIES: [&'static str; 7] =
        ["images", "labels", "data.yaml", "config.yaml", ".export", ".split-staging", ".split-retired"];

    /// Whether `name` is an entry this layout owns.
    #[must_use]
    pub fn is_managed_entry(name: &str) -> bool {
        Self::MANAGED_ENTRIES.contains(&name)
    }
}

/// Filesystem layout of the experiment tracker and model registry store.
///
/// Default layout is `<root>/runs/<run_id>/...` and `<root>/models/<name>/...`.
#[derive(Debug, Clone)]
pub struct TrackingLayout {
    root: PathBuf,
}

impl TrackingLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    #[must_use]
    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.runs_dir().join(run_id.0.as_str())
    }

    #[must_use]
    pub fn run_record_path(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("run.json")
    }

    #[must_use]
    pub fn artifacts_dir(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("artifacts")
    }

    #[must_use]
    pub fn model_dir(&self, name: &str) -> PathBuf {
        self.root.join("models").join(name)
    }

    #[must_use]
    pub fn model_registry_path(&self, name: &str) -> PathBuf {
        self.model_dir(name).join("registry.json")
    }

    #[must_use]
    pub fn model_version_dir(&self, name: &str, version: u32) -> PathBuf {
        self.model_dir(name).join(format!("v{version}"))
    }

    pub fn ensure_run_dirs(&self, run_id: &RunId) -> TrainingResult<()> {
        std::fs::create_dir_all(self.artifacts_dir(run_id))?;
        Ok(())
    }
}
