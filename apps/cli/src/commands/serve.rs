//! Inference host command.

use anyhow::Result;
use colored::Colorize;
use podium_core::{Pipeline, PipelineError, Settings, Stage};

pub async fn execute(settings: &Settings) -> Result<()> {
    let model = Pipeline::from_settings(settings)?.serving_model()?;
    println!(
        "{} {} on http://{}",
        "Serving".bold().green(),
        model.display(),
        settings.serve.address
    );
    podium_core::serve::run(&settings.serve, &model)
        .await
        .map_err(|e| PipelineError::new(Stage::Serve, e))?;
    Ok(())
}
