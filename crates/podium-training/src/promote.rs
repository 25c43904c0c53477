//! Champion/Challenger promotion of the latest completed run.

use crate::error::{PromotionError, TrainingResult};
use crate::registry::{ModelRegistry, ModelVersion, CHALLENGER, CHAMPION};
use crate::tracking::{ExperimentTracker, RunStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Metric written by the detection trainer for mAP at IoU 0.50.
pub const DEFAULT_PRIMARY_METRIC: &str = "metrics/mAP50(B)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionPolicy {
    pub model_name: String,
    pub metric: String,
    /// Treat a Champion whose metric cannot be read as scoring 0.
    pub allow_missing_champion_metric: bool,
}

impl PromotionPolicy {
    #[must_use]
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            metric: DEFAULT_PRIMARY_METRIC.to_string(),
            allow_missing_champion_metric: false,
        }
    }
}

/// Current Champion state for a model name.
#[derive(Debug, Clone, PartialEq)]
pub enum ChampionLookup {
    Absent,
    Found { version: ModelVersion, metric: f64 },
    /// A version holds the alias but its metric could not be read.
    MetricUnavailable { version: ModelVersion },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromotionOutcome {
    Promoted { version: ModelVersion, metric: f64, dethroned: Option<ModelVersion> },
    Retained { version: ModelVersion, metric: f64, champion: ModelVersion, champion_metric: f64 },
    /// The latest finished run was registered by an earlier promotion; nothing changed.
    AlreadyRegistered { version: ModelVersion },
}

impl PromotionOutcome {
    #[must_use]
    pub fn version(&self) -> &ModelVersion {
        match self {
            Self::Promoted { version, .. } | Self::Retained { version, .. } | Self::AlreadyRegistered { version } => {
                version
            }
        }
    }
}

pub fn lookup_champion(
    tracker: &dyn ExperimentTracker,
    registry: &dyn ModelRegistry,
    name: &str,
    metric: &str,
) -> TrainingResult<ChampionLookup> {
    let Some(version) = registry.version_by_alias(name, CHAMPION)? else {
        return Ok(ChampionLookup::Absent);
    };
    let value = tracker.get_run(&version.run_id).ok().and_then(|run| run.final_metric(metric));
    Ok(match value {
        Some(metric) => ChampionLookup::Found { version, metric },
        None => ChampionLookup::MetricUnavailable { version },
    })
}

/// Register the most recently finished run and move the Champion alias to it
/// when its primary metric is strictly better.
pub fn promote_latest_run(
    tracker: &dyn ExperimentTracker,
    registry: &dyn ModelRegistry,
    policy: &PromotionPolicy,
) -> TrainingResult<PromotionOutcome> {
    let run = tracker.latest_run(RunStatus::Finished)?.ok_or(PromotionError::NoActiveRun)?;
    if let Some(version) =
        registry.versions(&policy.model_name)?.into_iter().find(|v| v.run_id == run.run_id)
    {
        info!(
            model = %policy.model_name,
            version = version.version,
            run_id = %run.run_id,
            "latest run already registered; aliases unchanged"
        );
        return Ok(PromotionOutcome::AlreadyRegistered { version });
    }
    let weights = run
        .artifact_in("weights")
        .ok_or_else(|| PromotionError::MissingWeights(run.run_id.to_string()))?;
    let metric = run.final_metric(&policy.metric).ok_or_else(|| PromotionError::MissingMetric {
        run_id: run.run_id.to_string(),
        metric: policy.metric.clone(),
    })?;

    // Resolve the baseline before registering so a refusal leaves no trace.
    let champion = match lookup_champion(tracker, registry, &policy.model_name, &policy.metric)? {
        ChampionLookup::Absent => None,
        ChampionLookup::Found { version, metric } => Some((version, metric)),
        ChampionLookup::MetricUnavailable { version } => {
            if !policy.allow_missing_champion_metric {
                return Err(PromotionError::ChampionMetricUnavailable {
                    name: policy.model_name.clone(),
                    version: version.version,
                    metric: policy.metric.clone(),
                }
                .into());
            }
            warn!(
                model = %policy.model_name,
                version = version.version,
                "champion metric unavailable; treating it as 0"
            );
            Some((version, 0.0))
        }
    };

    let local = tracker.artifact_location(&run.run_id, weights);
    let version = registry.register_version(&policy.model_name, &run.run_id, &local)?;

    match champion {
        None => {
            registry.set_alias(&policy.model_name, CHAMPION, version.version)?;
            info!(model = %policy.model_name, version = version.version, metric, "first champion");
            let version = refreshed(registry, &policy.model_name, version)?;
            Ok(PromotionOutcome::Promoted { version, metric, dethroned: None })
        }
        Some((old, old_metric)) if metric > old_metric => {
            registry.set_alias(&policy.model_name, CHALLENGER, old.version)?;
            registry.set_alias(&policy.model_name, CHAMPION, version.version)?;
            info!(
                model = %policy.model_name,
                version = version.version,
                metric,
                previous = old.version,
                previous_metric = old_metric,
                "new champion"
            );
            let version = refreshed(registry, &policy.model_name, version)?;
            let dethroned = refreshed(registry, &policy.model_name, old)?;
            Ok(PromotionOutcome::Promoted { version, metric, dethroned: Some(dethroned) })
        }
        Some((champion, champion_metric)) => {
            info!(
                model = %policy.model_name,
                version = version.version,
                metric,
                champion = champion.version,
                champion_metric,
                "champion retained"
            );
            Ok(PromotionOutcome::Retained { version, metric, champion, champion_metric })
        }
    }
}

fn refreshed(registry: &dyn ModelRegistry, name: &str, version: ModelVersion) -> TrainingResult<ModelVersion> {
    Ok(registry
        .versions(name)?
        .into_iter()
        .find(|v| v.version == version.version)
        .unwrap_or(version))
}
