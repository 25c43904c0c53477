use crate::error::{TrainingError, TrainingResult};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    pub epochs: u32,
    pub batch: u32,
    pub learning_rate: f64,
    pub seed: u64,
    pub optimizer: String,
    /// Device selector passed through to the trainer (`cpu`, `0`, `0,1`, `mps`).
    pub device: String,
}

impl Default for HyperParams {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch: 16,
            learning_rate: 0.01,
            seed: 0,
            optimizer: "auto".to_string(),
            device: "cpu".to_string(),
        }
    }
}

impl HyperParams {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.epochs == 0 {
            return Err(TrainingError::InvalidSpec("epochs must be >= 1".to_string()));
        }
        if self.batch == 0 {
            return Err(TrainingError::InvalidSpec("batch must be >= 1".to_string()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidSpec("learning_rate must be > 0".to_string()));
        }
        if self.optimizer.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("optimizer is required".to_string()));
        }
        Ok(())
    }
}

/// Everything a trainer needs for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainRequest {
    pub run_name: String,
    /// Base or pretrained model identifier, e.g. `yolov8n.pt`.
    pub pretrained_model: String,
    /// Training config produced by the splitter.
    pub data_config: PathBuf,
    pub hyperparams: HyperParams,
    /// Host CPU/memory sampling period while training; `None` disables it.
    #[serde(default)]
    pub system_metrics_interval: Option<Duration>,
}

impl TrainRequest {
    #[must_use]
    pub fn new(pretrained_model: impl Into<String>, data_config: impl Into<PathBuf>, hyperparams: HyperParams) -> Self {
        let pretrained_model = pretrained_model.into();
        Self {
            run_name: run_name_for(&pretrained_model, Local::now()),
            pretrained_model,
            data_config: data_config.into(),
            hyperparams,
            system_metrics_interval: None,
        }
    }

    #[must_use]
    pub fn with_system_metrics(mut self, interval: Option<Duration>) -> Self {
        self.system_metrics_interval = interval;
        self
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.pretrained_model.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("pretrained_model is required".to_string()));
        }
        if !self.data_config.exists() {
            return Err(TrainingError::InvalidSpec(format!(
                "training config not found: {}",
                self.data_config.display()
            )));
        }
        self.hyperparams.validate()
    }

    /// Parameter map logged to the experiment tracker.
    #[must_use]
    pub fn params(&self) -> BTreeMap<String, String> {
        let hp = &self.hyperparams;
        BTreeMap::from([
            ("pretrained_model".to_string(), self.pretrained_model.clone()),
            ("data".to_string(), self.data_config.display().to_string()),
            ("epochs".to_string(), hp.epochs.to_string()),
            ("batch".to_string(), hp.batch.to_string()),
            ("lr0".to_string(), hp.learning_rate.to_string()),
            ("seed".to_string(), hp.seed.to_string()),
            ("optimizer".to_string(), hp.optimizer.clone()),
            ("device".to_string(), hp.device.clone()),
        ])
    }
}

/// `<model stem>-<dd-mm-YYYY-HH_MM_SS>`
#[must_use]
pub fn run_name_for(pretrained_model: &str, at: DateTime<Local>) -> String {
    let stem = Path::new(pretrained_model)
        .file_stem()
        .map_or_else(|| pretrained_model.to_string(), |s| s.to_string_lossy().into_owned());
    format!("{stem}-{}", at.format("%d-%m-%Y-%H_%M_%S"))
}
