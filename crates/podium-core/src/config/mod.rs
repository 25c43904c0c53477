//! Configuration module for Podium Core.
//!
//! Settings are layered, lowest precedence first: built-in defaults, the
//! general settings file, the secrets file, then `PODIUM__<SECTION>__<KEY>`
//! environment variables. The result is one explicit [`Settings`] value that
//! is passed to every stage.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use podium_training::{HyperParams, PromotionPolicy, SplitOptions};
use serde::Deserialize;

use crate::error::{CoreError, Result};

/// Default general settings file, relative to the working directory.
pub const DEFAULT_SETTINGS_PATH: &str = "config/settings.toml";
/// Default secrets file, relative to the working directory.
pub const DEFAULT_SECRETS_PATH: &str = "config/.secrets.toml";
/// Reference model worker shipped with the repository, relative to its root.
pub const DEFAULT_WORKER_SCRIPT: &str = "scripts/detect_worker.py";

/// Dataset platform access.
#[derive(Clone, Deserialize)]
pub struct PlatformSettings {
    /// API base URL of the dataset platform.
    #[serde(default = "default_platform_url")]
    pub base_url: String,
    /// API key, normally supplied by the secrets file.
    #[serde(default)]
    pub api_key: String,
    /// Dataset version identifier to fetch.
    #[serde(default)]
    pub dataset_id: String,
    /// Retries for transient network failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for PlatformSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("dataset_id", &self.dataset_id)
            .field("max_retries", &self.max_retries)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            base_url: default_platform_url(),
            api_key: String::new(),
            dataset_id: String::new(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_platform_url() -> String {
    "https://app.picsellia.com/api".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    60
}

/// Local dataset working directory and split parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct DataSettings {
    #[serde(default = "default_data_path")]
    pub path: PathBuf,
    #[serde(default = "default_split_seed")]
    pub split_seed: u64,
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    #[serde(default = "default_val_size")]
    pub val_size: f64,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            path: default_data_path(),
            split_seed: default_split_seed(),
            test_size: default_test_size(),
            val_size: default_val_size(),
        }
    }
}

impl DataSettings {
    #[must_use]
    pub fn split_options(&self) -> SplitOptions {
        SplitOptions { seed: self.split_seed, test_size: self.test_size, val_size: self.val_size }
    }
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data")
}

fn default_split_seed() -> u64 {
    42
}

fn default_test_size() -> f64 {
    0.2
}

fn default_val_size() -> f64 {
    0.1
}

/// Trainer invocation and hyperparameters.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingSettings {
    #[serde(default = "default_pretrained_model")]
    pub pretrained_model: String,
    /// Training config path; defaults to `<data.path>/config.yaml`.
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    #[serde(default = "default_batch")]
    pub batch: u32,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_optimizer")]
    pub optimizer: String,
    #[serde(default = "default_device")]
    pub device: String,
    /// External training program.
    #[serde(default = "default_trainer_program")]
    pub program: String,
    /// Where the training program writes its run directories.
    #[serde(default = "default_runs_dir")]
    pub runs_dir: PathBuf,
    /// Dependency manifest attached to every run.
    #[serde(default = "default_requirements_path")]
    pub requirements_path: PathBuf,
    /// Host CPU/memory sampling period during training; 0 disables sampling.
    #[serde(default = "default_system_metrics_interval_secs")]
    pub system_metrics_interval_secs: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            pretrained_model: default_pretrained_model(),
            config_path: None,
            epochs: default_epochs(),
            batch: default_batch(),
            learning_rate: default_learning_rate(),
            seed: 0,
            optimizer: default_optimizer(),
            device: default_device(),
            program: default_trainer_program(),
            runs_dir: default_runs_dir(),
            requirements_path: default_requirements_path(),
            system_metrics_interval_secs: default_system_metrics_interval_secs(),
        }
    }
}

impl TrainingSettings {
    #[must_use]
    pub fn hyperparams(&self) -> HyperParams {
        HyperParams {
            epochs: self.epochs,
            batch: self.batch,
            learning_rate: self.learning_rate,
            seed: self.seed,
            optimizer: self.optimizer.clone(),
            device: self.device.clone(),
        }
    }

    #[must_use]
    pub fn system_metrics_interval(&self) -> Option<Duration> {
        (self.system_metrics_interval_secs > 0).then(|| Duration::from_secs(self.system_metrics_interval_secs))
    }
}

fn default_pretrained_model() -> String {
    "yolov8n.pt".to_string()
}

fn default_epochs() -> u32 {
    100
}

fn default_batch() -> u32 {
    16
}

fn default_learning_rate() -> f64 {
    0.01
}

fn default_optimizer() -> String {
    "auto".to_string()
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_trainer_program() -> String {
    "yolo".to_string()
}

fn default_runs_dir() -> PathBuf {
    PathBuf::from("runs")
}

fn default_requirements_path() -> PathBuf {
    PathBuf::from("Cargo.lock")
}

fn default_system_metrics_interval_secs() -> u64 {
    10
}

/// Experiment tracker and model registry store.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingSettings {
    #[serde(default = "default_tracking_root")]
    pub root: PathBuf,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self { root: default_tracking_root() }
    }
}

fn default_tracking_root() -> PathBuf {
    PathBuf::from("tracking")
}

/// Champion/Challenger promotion.
#[derive(Debug, Clone, Deserialize)]
pub struct PromotionSettings {
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_primary_metric")]
    pub primary_metric: String,
    #[serde(default)]
    pub allow_missing_champion_metric: bool,
}

impl Default for PromotionSettings {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            primary_metric: default_primary_metric(),
            allow_missing_champion_metric: false,
        }
    }
}

impl PromotionSettings {
    #[must_use]
    pub fn policy(&self) -> PromotionPolicy {
        PromotionPolicy {
            model_name: self.model_name.clone(),
            metric: self.primary_metric.clone(),
            allow_missing_champion_metric: self.allow_missing_champion_metric,
        }
    }
}

fn default_model_name() -> String {
    "detector".to_string()
}

fn default_primary_metric() -> String {
    podium_training::promote::DEFAULT_PRIMARY_METRIC.to_string()
}

/// Inference host.
#[derive(Debug, Clone, Deserialize)]
pub struct ServeSettings {
    #[serde(default = "default_serve_address")]
    pub address: SocketAddr,
    /// Weights file loaded by the model worker.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    /// Worker command line; the model path is appended as the last argument.
    #[serde(default = "default_worker_command")]
    pub worker_command: Vec<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_serve_timeout")]
    pub timeout_secs: u64,
    /// How long to wait for the worker's ready line.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
}

impl Default for ServeSettings {
    fn default() -> Self {
        Self {
            address: default_serve_address(),
            model_path: None,
            worker_command: default_worker_command(),
            timeout_secs: default_serve_timeout(),
            startup_timeout_secs: default_startup_timeout(),
        }
    }
}

impl ServeSettings {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_serve_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_worker_command() -> Vec<String> {
    vec!["python3".to_string(), DEFAULT_WORKER_SCRIPT.to_string()]
}

fn default_serve_timeout() -> u64 {
    30
}

fn default_startup_timeout() -> u64 {
    120
}

/// Root configuration for Podium.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub platform: PlatformSettings,
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub training: TrainingSettings,
    #[serde(default)]
    pub tracking: TrackingSettings,
    #[serde(default)]
    pub promotion: PromotionSettings,
    #[serde(default)]
    pub serve: ServeSettings,
}

impl Settings {
    /// Load from the default file locations plus environment.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_SETTINGS_PATH), Path::new(DEFAULT_SECRETS_PATH))
    }

    /// Load from explicit file locations plus environment. Missing files are
    /// skipped.
    pub fn load_from(settings_path: &Path, secrets_path: &Path) -> Result<Self> {
        Self::builder(settings_path, secrets_path)
            .add_source(
                Environment::with_prefix("PODIUM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| CoreError::Config(e.to_string()))
    }

    fn builder(settings_path: &Path, secrets_path: &Path) -> config::ConfigBuilder<config::builder::DefaultState> {
        Config::builder()
            .add_source(File::from(settings_path).format(FileFormat::Toml).required(false))
            .add_source(File::from(secrets_path).format(FileFormat::Toml).required(false))
    }

    /// Training config path, defaulting to the splitter's output location.
    #[must_use]
    pub fn training_config_path(&self) -> PathBuf {
        self.training
            .config_path
            .clone()
            .unwrap_or_else(|| podium_training::DatasetLayout::new(&self.data.path).training_config_path())
    }

    /// Checks shared by every stage.
    pub fn validate(&self) -> Result<()> {
        self.data.split_options().validate().map_err(|e| CoreError::Config(e.to_string()))?;
        self.training.hyperparams().validate().map_err(|e| CoreError::Config(e.to_string()))?;
        if self.promotion.model_name.trim().is_empty() {
            return Err(CoreError::Config("promotion.model_name is required".to_string()));
        }
        if self.serve.timeout_secs == 0 {
            return Err(CoreError::Config("serve.timeout_secs must be >= 1".to_string()));
        }
        Ok(())
    }

    /// Checks needed before talking to the dataset platform.
    pub fn validate_platform(&self) -> Result<()> {
        if self.platform.api_key.trim().is_empty() {
            return Err(CoreError::Config(
                "platform.api_key is not set (add it to the secrets file or PODIUM__PLATFORM__API_KEY)".to_string(),
            ));
        }
        if self.platform.dataset_id.trim().is_empty() {
            return Err(CoreError::Config("platform.dataset_id is not set".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.data.path, PathBuf::from("data"));
        assert_eq!(settings.serve.address, "127.0.0.1:3000".parse().unwrap());
        assert_eq!(settings.promotion.primary_metric, "metrics/mAP50(B)");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_system_metrics_interval_zero_disables_sampling() {
        let temp = TempDir::new().unwrap();
        let settings_path = temp.path().join("settings.toml");
        std::fs::write(&settings_path, "[training]\nsystem_metrics_interval_secs = 0\n").unwrap();

        let settings = Settings::load_from(&settings_path, &temp.path().join(".secrets.toml")).unwrap();
        assert_eq!(settings.training.system_metrics_interval(), None);
        assert_eq!(Settings::default().training.system_metrics_interval(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_default_worker_ships_with_repository() {
        let settings = Settings::default();
        assert_eq!(settings.serve.worker_command, ["python3", DEFAULT_WORKER_SCRIPT]);

        let script = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..").join(DEFAULT_WORKER_SCRIPT);
        let source = std::fs::read_to_string(script).unwrap();
        assert!(source.contains("\"ready\": True"));
        assert!(source.contains("inference_time"));
    }

    #[test]
    fn test_settings_missing_files_fall_back_to_defaults() {
        let temp = TempDir::new().unwrap();
        let settings =
            Settings::load_from(&temp.path().join("settings.toml"), &temp.path().join(".secrets.toml")).unwrap();
        assert_eq!(settings.training.epochs, 100);
        assert!(settings.platform.api_key.is_empty());
    }

    #[test]
    fn test_secrets_layer_over_settings() {
        let temp = TempDir::new().unwrap();
        let settings_path = temp.path().join("settings.toml");
        let secrets_path = temp.path().join(".secrets.toml");
        std::fs::write(
            &settings_path,
            "[platform]\ndataset_id = \"ds-1\"\napi_key = \"placeholder\"\n\n[data]\npath = \"datasets/data\"\ntest_size = 0.25\n\n[training]\nepochs = 5\n",
        )
        .unwrap();
        std::fs::write(&secrets_path, "[platform]\napi_key = \"secret-token\"\n").unwrap();

        let settings = Settings::load_from(&settings_path, &secrets_path).unwrap();
        assert_eq!(settings.platform.api_key, "secret-token");
        assert_eq!(settings.platform.dataset_id, "ds-1");
        assert_eq!(settings.data.path, PathBuf::from("datasets/data"));
        assert!((settings.data.test_size - 0.25).abs() < f64::EPSILON);
        assert_eq!(settings.training.epochs, 5);
        assert_eq!(settings.training_config_path(), PathBuf::from("datasets/data/config.yaml"));
        assert!(settings.validate_platform().is_ok());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let settings = PlatformSettings { api_key: "secret-token".to_string(), ..Default::default() };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_validate_rejects_fraction_sum() {
        let mut settings = Settings::default();
        settings.data.test_size = 0.7;
        settings.data.val_size = 0.3;
        assert!(matches!(settings.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_validate_platform_requires_key() {
        let settings = Settings::default();
        assert!(settings.validate_platform().is_err());
    }
}
