//! Podium Core - wiring for the detection-model pipeline.
//!
//! This crate provides the concrete collaborators behind the primitives in
//! `podium-training`:
//! - Layered settings (`config`)
//! - The dataset platform HTTP client (`platform`)
//! - The subprocess trainer (`training`)
//! - The stage runner with its exit-code taxonomy (`pipeline`)
//! - The HTTP inference host (`serve`)
//!
//! # Example
//!
//! ```rust,no_run
//! use podium_core::{Pipeline, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), podium_core::PipelineError> {
//!     let settings = Settings::load().map_err(|e| podium_core::PipelineError::new(podium_core::Stage::Config, e))?;
//!     let report = Pipeline::from_settings(&settings)?.run().await?;
//!     println!("registered version {}", report.promotion.version().version);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod platform;
pub mod serve;
pub mod training;

pub use config::Settings;
pub use error::{CoreError, Result};
pub use models::{list_models, ModelSummary};
pub use pipeline::{Pipeline, PipelineError, PipelineReport, Stage, ValidationSummary};
pub use platform::{PlatformClient, PlatformError};
pub use serve::{Detector, Prediction, ServeError, WorkerDetector};
pub use training::CommandTrainer;
