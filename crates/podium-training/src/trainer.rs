use crate::error::TrainingResult;
use crate::job::TrainRequest;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::system::SystemMonitor;
use crate::tracking::{ExperimentTracker, MetricPoint, RunGuard, RunRecord};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// What a detection trainer leaves behind.
#[derive(Debug, Clone, Default)]
pub struct TrainOutcome {
    pub weights: PathBuf,
    /// Metric name -> per-epoch series.
    pub metrics: BTreeMap<String, Vec<MetricPoint>>,
    /// Extra files worth attaching to the run, keyed by artifact path.
    pub artifacts: Vec<(String, PathBuf)>,
}

#[async_trait]
pub trait Trainer: Send + Sync {
    fn id(&self) -> &'static str;

    async fn train(&self, request: &TrainRequest, progress: &dyn ProgressSink) -> TrainingResult<TrainOutcome>;
}

/// Run `trainer` inside a tracked run.
///
/// Parameters and `extra_artifacts` are logged before training starts. When
/// the request sets a sampling interval, host CPU and memory usage is logged
/// as `system/*` series, including for runs whose training fails. The run is
/// closed as finished only if training and all logging succeed; on any other
/// exit it is closed as failed.
pub async fn run_training(
    trainer: &dyn Trainer,
    tracker: &dyn ExperimentTracker,
    request: &TrainRequest,
    extra_artifacts: &[(String, PathBuf)],
    progress: &dyn ProgressSink,
) -> TrainingResult<RunRecord> {
    request.validate()?;

    let run = RunGuard::start(tracker, &request.run_name)?;
    info!(run = %request.run_name, run_id = %run.run_id(), trainer = trainer.id(), "tracking run opened");
    run.log_params(&request.params())?;
    for (artifact_path, local) in extra_artifacts {
        run.log_artifact(local, artifact_path)?;
    }

    progress.on_event(ProgressEvent::Started { run_name: request.run_name.clone() });
    let monitor = request.system_metrics_interval.map(SystemMonitor::start);
    let trained = trainer.train(request, progress).await;
    if let Some(monitor) = monitor {
        for (key, series) in monitor.stop().await {
            for point in series {
                run.log_metric(&key, point)?;
            }
        }
    }
    let outcome = trained?;

    for (key, series) in &outcome.metrics {
        for point in series {
            run.log_metric(key, *point)?;
        }
    }
    run.log_artifact(&outcome.weights, "weights")?;
    for (artifact_path, local) in &outcome.artifacts {
        if local.exists() {
            run.log_artifact(local, artifact_path)?;
        } else {
            warn!(path = %local.display(), "trainer artifact missing; skipped");
        }
    }

    let record = run.finish()?;
    progress.on_event(ProgressEvent::Finished { run_name: request.run_name.clone() });
    Ok(record)
}
