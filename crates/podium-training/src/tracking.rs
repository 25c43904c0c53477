//! Experiment tracking: runs, parameters, metric series and artifacts.

use crate::artifacts::{copy_verified, write_json_atomic};
use crate::error::{TrainingError, TrainingResult};
use crate::layout::TrackingLayout;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Identifier for a tracked run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub step: u64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedArtifact {
    /// Path relative to the run's artifact root, `/`-separated.
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub run_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, Vec<MetricPoint>>,
    #[serde(default)]
    pub artifacts: Vec<LoggedArtifact>,
}

impl RunRecord {
    /// Last logged value of `key`.
    #[must_use]
    pub fn final_metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).and_then(|series| series.last()).map(|p| p.value)
    }

    /// First artifact stored under `dir/`.
    #[must_use]
    pub fn artifact_in(&self, dir: &str) -> Option<&LoggedArtifact> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.artifacts.iter().find(|a| a.path.starts_with(&prefix))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.status != RunStatus::Running
    }
}

pub trait ExperimentTracker: Send + Sync {
    fn start_run(&self, run_name: &str) -> TrainingResult<RunId>;

    fn log_params(&self, run_id: &RunId, params: &BTreeMap<String, String>) -> TrainingResult<()>;

    fn log_metric(&self, run_id: &RunId, key: &str, point: MetricPoint) -> TrainingResult<()>;

    /// Copy a file, or every file under a directory, into the run's artifact
    /// store under `artifact_path`.
    fn log_artifact(&self, run_id: &RunId, local: &Path, artifact_path: &str) -> TrainingResult<Vec<LoggedArtifact>>;

    /// Local path of a logged artifact.
    fn artifact_location(&self, run_id: &RunId, artifact: &LoggedArtifact) -> PathBuf;

    fn end_run(&self, run_id: &RunId, status: RunStatus) -> TrainingResult<()>;

    fn get_run(&self, run_id: &RunId) -> TrainingResult<RunRecord>;

    fn runs(&self) -> TrainingResult<Vec<RunRecord>>;

    /// Most recently ended (or, for running runs, started) run with `status`.
    fn latest_run(&self, status: RunStatus) -> TrainingResult<Option<RunRecord>> {
        Ok(self
            .runs()?
            .into_iter()
            .filter(|r| r.status == status)
            .max_by_key(|r| r.ended_at.unwrap_or(r.started_at)))
    }
}

/// Open run scope. Dropping the guard without [`RunGuard::finish`] marks the
/// run failed, so a run is never left `Running` on an error path.
pub struct RunGuard<'a> {
    tracker: &'a dyn ExperimentTracker,
    run_id: RunId,
    closed: bool,
}

impl<'a> RunGuard<'a> {
    pub fn start(tracker: &'a dyn ExperimentTracker, run_name: &str) -> TrainingResult<Self> {
        let run_id = tracker.start_run(run_name)?;
        Ok(Self { tracker, run_id, closed: false })
    }

    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn log_params(&self, params: &BTreeMap<String, String>) -> TrainingResult<()> {
        self.tracker.log_params(&self.run_id, params)
    }

    pub fn log_metric(&self, key: &str, point: MetricPoint) -> TrainingResult<()> {
        self.tracker.log_metric(&self.run_id, key, point)
    }

    pub fn log_artifact(&self, local: &Path, artifact_path: &str) -> TrainingResult<Vec<LoggedArtifact>> {
        self.tracker.log_artifact(&self.run_id, local, artifact_path)
    }

    /// Close the run as finished and return its final record. If the tracker
    /// cannot record the finish, the guard still marks the run failed on drop.
    pub fn finish(mut self) -> TrainingResult<RunRecord> {
        self.tracker.end_run(&self.run_id, RunStatus::Finished)?;
        self.closed = true;
        self.tracker.get_run(&self.run_id)
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!(run_id = %self.run_id, "run scope exited without finishing; marking run failed");
        if let Err(e) = self.tracker.end_run(&self.run_id, RunStatus::Failed) {
            warn!(run_id = %self.run_id, error = %e, "failed to mark run as failed");
        }
    }
}

/// Experiment tracker backed by a local directory tree.
#[derive(Debug)]
pub struct FileTracker {
    layout: TrackingLayout,
    write_lock: Mutex<()>,
}

impl FileTracker {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { layout: TrackingLayout::new(root), write_lock: Mutex::new(()) }
    }

    #[must_use]
    pub fn layout(&self) -> &TrackingLayout {
        &self.layout
    }

    fn read_record(&self, run_id: &RunId) -> TrainingResult<RunRecord> {
        let path = self.layout.run_record_path(run_id);
        let bytes = std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TrainingError::Tracking(format!("run not found: {run_id}"))
            } else {
                e.into()
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Read-modify-write an open run record.
    fn update_open<F>(&self, run_id: &RunId, update: F) -> TrainingResult<()>
    where
        F: FnOnce(&mut RunRecord) -> TrainingResult<()>,
    {
        let _lock = self.write_lock.lock().map_err(|_| TrainingError::Tracking("tracker lock poisoned".to_string()))?;
        let mut record = self.read_record(run_id)?;
        if record.is_closed() {
            return Err(TrainingError::RunClosed(run_id.to_string()));
        }
        update(&mut record)?;
        write_json_atomic(&self.layout.run_record_path(run_id), &record)
    }
}

impl ExperimentTracker for FileTracker {
    fn start_run(&self, run_name: &str) -> TrainingResult<RunId> {
        let run_id = RunId::new();
        self.layout.ensure_run_dirs(&run_id)?;
        let record = RunRecord {
            run_id: run_id.clone(),
            run_name: run_name.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            artifacts: Vec::new(),
        };
        write_json_atomic(&self.layout.run_record_path(&run_id), &record)?;
        debug!(%run_id, run_name, "run started");
        Ok(run_id)
    }

    fn log_params(&self, run_id: &RunId, params: &BTreeMap<String, String>) -> TrainingResult<()> {
        self.update_open(run_id, |record| {
            record.params.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(())
        })
    }

    fn log_metric(&self, run_id: &RunId, key: &str, point: MetricPoint) -> TrainingResult<()> {
        self.update_open(run_id, |record| {
            record.metrics.entry(key.to_string()).or_default().push(point);
            Ok(())
        })
    }

    fn log_artifact(&self, run_id: &RunId, local: &Path, artifact_path: &str) -> TrainingResult<Vec<LoggedArtifact>> {
        let artifact_path = artifact_path.trim_matches('/');
        let artifacts_root = self.layout.artifacts_dir(run_id);

        let mut sources = Vec::new();
        if local.is_dir() {
            for entry in WalkDir::new(local).sort_by_file_name() {
                let entry = entry.map_err(|e| TrainingError::Artifact(e.to_string()))?;
                if entry.file_type().is_file() {
                    let rel = entry
                        .path()
                        .strip_prefix(local)
                        .map_err(|e| TrainingError::Artifact(e.to_string()))?
                        .to_path_buf();
                    sources.push((entry.path().to_path_buf(), rel));
                }
            }
        } else {
            let name = local
                .file_name()
                .ok_or_else(|| TrainingError::Artifact(format!("not a file: {}", local.display())))?;
            sources.push((local.to_path_buf(), PathBuf::from(name)));
        }

        let mut logged = Vec::with_capacity(sources.len());
        for (src, rel) in sources {
            let rel = rel.to_string_lossy().replace('\\', "/");
            let path = if artifact_path.is_empty() { rel } else { format!("{artifact_path}/{rel}") };
            let sha256 = copy_verified(&src, &artifacts_root.join(&path))?;
            logged.push(LoggedArtifact { path, sha256 });
        }

        let added = logged.clone();
        self.update_open(run_id, move |record| {
            record.artifacts.retain(|a| !added.iter().any(|n| n.path == a.path));
            record.artifacts.extend(added);
            Ok(())
        })?;
        Ok(logged)
    }

    fn artifact_location(&self, run_id: &RunId, artifact: &LoggedArtifact) -> PathBuf {
        self.layout.artifacts_dir(run_id).join(&artifact.path)
    }

    fn end_run(&self, run_id: &RunId, status: RunStatus) -> TrainingResult<()> {
        self.update_open(run_id, |record| {
            record.status = status;
            record.ended_at = Some(Utc::now());
            Ok(())
        })?;
        debug!(%run_id, ?status, "run ended");
        Ok(())
    }

    fn get_run(&self, run_id: &RunId) -> TrainingResult<RunRecord> {
        self.read_record(run_id)
    }

    fn runs(&self) -> TrainingResult<Vec<RunRecord>> {
        let dir = match std::fs::read_dir(self.layout.runs_dir()) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        for entry in dir {
            let entry = entry?;
            let record_path = entry.path().join("run.json");
            if !record_path.exists() {
                continue;
            }
            let bytes = std::fs::read(&record_path)?;
            out.push(serde_json::from_slice::<RunRecord>(&bytes)?);
        }
        out.sort_by_key(|r| r.started_at);
        Ok(out)
    }
}
