//! Registry listing with each version's primary metric.

use podium_training::{ExperimentTracker, ModelRegistry, RunId, TrainingResult};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub version: u32,
    pub aliases: Vec<String>,
    pub run_id: RunId,
    /// Final value of the primary metric, if the run still has it.
    pub metric: Option<f64>,
    pub source: PathBuf,
}

/// Every registered version of every model, ordered by name then version.
pub fn list_models(
    tracker: &dyn ExperimentTracker,
    registry: &dyn ModelRegistry,
    metric: &str,
) -> TrainingResult<Vec<ModelSummary>> {
    let mut summaries = Vec::new();
    for name in registry.models()? {
        for version in registry.versions(&name)? {
            let metric = tracker.get_run(&version.run_id).ok().and_then(|run| run.final_metric(metric));
            summaries.push(ModelSummary {
                name: version.name,
                version: version.version,
                aliases: version.aliases,
                run_id: version.run_id,
                metric,
                source: version.source,
            });
        }
    }
    Ok(summaries)
}
