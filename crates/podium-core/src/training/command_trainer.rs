use podium_training::{
    MetricPoint, ProgressEvent, ProgressSink, TrainOutcome, TrainRequest, Trainer, TrainingError, TrainingResult,
};

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::TrainingSettings;

/// Lines of trainer output kept for error reports.
const OUTPUT_TAIL: usize = 20;

/// Runs an external detection-training CLI as a subprocess and collects the
/// metrics and weights it writes under `<runs_dir>/<run_name>/`.
#[derive(Debug, Clone)]
pub struct CommandTrainer {
    program: String,
    leading_args: Vec<String>,
    runs_dir: PathBuf,
}

impl CommandTrainer {
    #[must_use]
    pub fn new(program: impl Into<String>, runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: vec!["detect".to_string(), "train".to_string()],
            runs_dir: runs_dir.into(),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &TrainingSettings) -> Self {
        Self::new(settings.program.clone(), settings.runs_dir.clone())
    }

    /// Replace the sub-command words placed before the `key=value` arguments.
    #[must_use]
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    fn project_dir(&self) -> TrainingResult<PathBuf> {
        Ok(std::path::absolute(&self.runs_dir)?)
    }

    /// Output directory of one run.
    pub fn run_dir(&self, request: &TrainRequest) -> TrainingResult<PathBuf> {
        Ok(self.project_dir()?.join(&request.run_name))
    }

    fn args(&self, request: &TrainRequest) -> TrainingResult<Vec<String>> {
        let hp = &request.hyperparams;
        let mut args = self.leading_args.clone();
        args.extend([
            format!("model={}", request.pretrained_model),
            format!("data={}", std::path::absolute(&request.data_config)?.display()),
            format!("epochs={}", hp.epochs),
            format!("batch={}", hp.batch),
            format!("seed={}", hp.seed),
            format!("optimizer={}", hp.optimizer),
            format!("lr0={}", hp.learning_rate),
            format!("device={}", hp.device),
            format!("project={}", self.project_dir()?.display()),
            format!("name={}", request.run_name),
            "exist_ok=True".to_string(),
        ]);
        Ok(args)
    }
}

#[async_trait]
impl Trainer for CommandTrainer {
    fn id(&self) -> &'static str {
        "command"
    }

    async fn train(&self, request: &TrainRequest, progress: &dyn ProgressSink) -> TrainingResult<TrainOutcome> {
        let args = self.args(request)?;
        info!(program = %self.program, run = %request.run_name, "starting trainer process");
        debug!(?args, "trainer arguments");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TrainingError::Trainer(format!("failed to spawn {}: {e}", self.program)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TrainingError::Trainer("failed to get stdout handle".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TrainingError::Trainer("failed to get stderr handle".to_string()))?;

        let last_epoch = AtomicU64::new(0);
        let (out_tail, err_tail) = tokio::join!(
            pump(stdout, &request.run_name, &last_epoch, progress),
            pump(stderr, &request.run_name, &last_epoch, progress),
        );
        let status = child.wait().await?;

        if !status.success() {
            let tail: Vec<String> = err_tail?.into_iter().chain(out_tail?).collect();
            return Err(TrainingError::Trainer(format!(
                "{} exited with {status}\n{}",
                self.program,
                tail.join("\n")
            )));
        }

        let run_dir = self.run_dir(request)?;
        let results = run_dir.join("results.csv");
        let metrics = read_results_csv(&results)?;
        let weights = locate_weights(&run_dir)?;
        info!(run = %request.run_name, weights = %weights.display(), series = metrics.len(), "trainer finished");

        Ok(TrainOutcome { weights, metrics, artifacts: vec![("results".to_string(), results)] })
    }
}

/// Log every line of a child stream, turning `N/M` epoch counters into
/// progress events. Returns the last few lines.
///
/// Lines are decoded lossily and the stream is drained to EOF, so stray
/// non-UTF-8 bytes in trainer output never close the pipe early.
async fn pump<R>(
    stream: R,
    run_name: &str,
    last_epoch: &AtomicU64,
    progress: &dyn ProgressSink,
) -> std::io::Result<VecDeque<String>>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut tail = VecDeque::with_capacity(OUTPUT_TAIL);
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf).trim_end_matches(['\n', '\r']).to_string();
        debug!(run = run_name, "{line}");
        if let Some((epoch, total)) = parse_epoch(&line)
            && last_epoch.fetch_max(epoch, Ordering::SeqCst) < epoch
        {
            progress.on_event(ProgressEvent::Epoch { run_name: run_name.to_string(), epoch, total: Some(total) });
        }
        if tail.len() == OUTPUT_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Ok(tail)
}

/// Detection trainers print per-epoch rows starting with `epoch/total`.
fn parse_epoch(line: &str) -> Option<(u64, u64)> {
    let token = line.split_whitespace().next()?;
    let (epoch, total) = token.split_once('/')?;
    let epoch = epoch.parse().ok()?;
    let total = total.parse().ok()?;
    (epoch >= 1 && epoch <= total).then_some((epoch, total))
}

/// Parse a trainer's `results.csv` into metric series keyed by column name.
///
/// Header names are whitespace-trimmed; `epoch` supplies the step and every
/// other column with numeric values becomes a series.
pub fn read_results_csv(path: &Path) -> TrainingResult<BTreeMap<String, Vec<MetricPoint>>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| TrainingError::Trainer(format!("failed to open {}: {e}", path.display())))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| TrainingError::Trainer(format!("failed to read {} header: {e}", path.display())))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let epoch_col = headers
        .iter()
        .position(|h| h == "epoch")
        .ok_or_else(|| TrainingError::Trainer(format!("{} has no epoch column", path.display())))?;

    let mut metrics: BTreeMap<String, Vec<MetricPoint>> = BTreeMap::new();
    for row in reader.records() {
        let row = row.map_err(|e| TrainingError::Trainer(format!("failed to read {}: {e}", path.display())))?;
        let Some(step) = row.get(epoch_col).and_then(|v| v.parse::<f64>().ok()) else {
            continue;
        };
        let step = step.max(0.0) as u64;
        for (i, value) in row.iter().enumerate() {
            if i == epoch_col {
                continue;
            }
            if let (Some(name), Ok(value)) = (headers.get(i), value.parse::<f64>()) {
                metrics.entry(name.clone()).or_default().push(MetricPoint { step, value });
            }
        }
    }
    Ok(metrics)
}

fn locate_weights(run_dir: &Path) -> TrainingResult<PathBuf> {
    let weights_dir = run_dir.join("weights");
    ["best.pt", "last.pt"]
        .iter()
        .map(|name| weights_dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| TrainingError::Trainer(format!("no weights found in {}", weights_dir.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use podium_training::{HyperParams, LogProgressSink};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const RESULTS: &str = "\
                  epoch,      train/box_loss,   metrics/precision(B),   metrics/mAP50(B),metrics/mAP50-95(B)
                      1,              1.2345,                0.41,           0.3012,            0.1500
                      2,              1.1000,                0.52,           0.4512,            0.2100
";

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for RecordingSink {
        fn on_event(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    /// Shell stand-in for the training CLI: writes results and weights into
    /// `<project>/<name>/`.
    const FAKE_TRAINER: &str = r#"
for arg in "$@"; do
  case "$arg" in
    project=*) project="${arg#project=}" ;;
    name=*) name="${arg#name=}" ;;
    epochs=*) epochs="${arg#epochs=}" ;;
  esac
done
dir="$project/$name"
mkdir -p "$dir/weights"
echo "      1/$epochs      0G      1.23"
echo "      2/$epochs      0G      1.10" >&2
printf 'epoch,metrics/mAP50(B)\n1,0.30\n2,0.55\n' > "$dir/results.csv"
echo weights > "$dir/weights/best.pt"
"#;

    fn request(temp: &TempDir) -> TrainRequest {
        let config = temp.path().join("config.yaml");
        std::fs::write(&config, "path: x\n").unwrap();
        TrainRequest::new("yolov8n.pt", config, HyperParams { epochs: 2, ..Default::default() })
    }

    fn shell_trainer(temp: &TempDir, script: &str) -> CommandTrainer {
        let script_path = temp.path().join("trainer.sh");
        std::fs::write(&script_path, script).unwrap();
        CommandTrainer::new("sh", temp.path().join("runs"))
            .with_leading_args(vec![script_path.display().to_string()])
    }

    #[test]
    fn test_read_results_csv_trims_headers() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("results.csv");
        std::fs::write(&path, RESULTS).unwrap();

        let metrics = read_results_csv(&path).unwrap();
        assert!(!metrics.contains_key("epoch"));
        let map50 = &metrics["metrics/mAP50(B)"];
        assert_eq!(map50.len(), 2);
        assert_eq!(map50[1].step, 2);
        assert!((map50[1].value - 0.4512).abs() < 1e-9);
        assert!(metrics.contains_key("train/box_loss"));
    }

    #[test]
    fn test_read_results_csv_requires_epoch_column() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("results.csv");
        std::fs::write(&path, "step,loss\n1,0.5\n").unwrap();
        assert!(matches!(read_results_csv(&path), Err(TrainingError::Trainer(_))));
    }

    #[test]
    fn test_parse_epoch() {
        assert_eq!(parse_epoch("      3/100      0G      1.2"), Some((3, 100)));
        assert_eq!(parse_epoch("Epoch    GPU_mem"), None);
        assert_eq!(parse_epoch("0/10"), None);
        assert_eq!(parse_epoch(""), None);
    }

    #[test]
    fn test_args_follow_trainer_convention() {
        let temp = TempDir::new().unwrap();
        let trainer = CommandTrainer::new("yolo", temp.path().join("runs"));
        let request = request(&temp);
        let args = trainer.args(&request).unwrap();
        assert_eq!(&args[..2], ["detect", "train"]);
        assert!(args.contains(&"model=yolov8n.pt".to_string()));
        assert!(args.contains(&"epochs=2".to_string()));
        assert!(args.contains(&format!("name={}", request.run_name)));
        assert_eq!(args.last().map(String::as_str), Some("exist_ok=True"));
    }

    #[tokio::test]
    async fn test_train_collects_metrics_weights_and_progress() {
        let temp = TempDir::new().unwrap();
        let trainer = shell_trainer(&temp, FAKE_TRAINER);
        let sink = RecordingSink::default();

        let outcome = trainer.train(&request(&temp), &sink).await.unwrap();
        assert!(outcome.weights.ends_with("weights/best.pt"));
        assert!((outcome.metrics["metrics/mAP50(B)"].last().unwrap().value - 0.55).abs() < 1e-9);
        assert_eq!(outcome.artifacts[0].0, "results");

        let epochs: Vec<u64> = sink
            .0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Epoch { epoch, .. } => Some(*epoch),
                _ => None,
            })
            .collect();
        assert!(!epochs.is_empty());
        assert!(epochs.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_train_tolerates_non_utf8_output() {
        let temp = TempDir::new().unwrap();
        let script = format!("printf 'loss \\377\\376 ok\\n'\nprintf 'bad \\377\\n' >&2\n{FAKE_TRAINER}");
        let trainer = shell_trainer(&temp, &script);
        let sink = RecordingSink::default();

        let outcome = trainer.train(&request(&temp), &sink).await.unwrap();
        assert!(outcome.weights.ends_with("weights/best.pt"));
        assert_eq!(outcome.metrics["metrics/mAP50(B)"].len(), 2);
        assert!(sink.0.lock().unwrap().iter().any(|e| matches!(e, ProgressEvent::Epoch { epoch: 2, .. })));
    }

    #[tokio::test]
    async fn test_non_utf8_output_is_kept_in_error_tail() {
        let temp = TempDir::new().unwrap();
        let trainer = shell_trainer(&temp, "printf 'fatal \\377 crash\\n' >&2\nexit 1\n");

        let err = trainer.train(&request(&temp), &LogProgressSink).await.unwrap_err();
        assert!(matches!(err, TrainingError::Trainer(msg) if msg.contains("fatal \u{fffd} crash")));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_a_trainer_error() {
        let temp = TempDir::new().unwrap();
        let trainer = shell_trainer(&temp, "echo 'CUDA out of memory' >&2\nexit 3\n");

        let err = trainer.train(&request(&temp), &LogProgressSink).await.unwrap_err();
        match err {
            TrainingError::Trainer(msg) => assert!(msg.contains("CUDA out of memory")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_weights_is_an_error() {
        let temp = TempDir::new().unwrap();
        let script = r#"
for arg in "$@"; do case "$arg" in project=*) p="${arg#project=}" ;; name=*) n="${arg#name=}" ;; esac; done
mkdir -p "$p/$n"
printf 'epoch,metrics/mAP50(B)\n1,0.1\n' > "$p/$n/results.csv"
"#;
        let trainer = shell_trainer(&temp, script);
        let err = trainer.train(&request(&temp), &LogProgressSink).await.unwrap_err();
        assert!(matches!(err, TrainingError::Trainer(msg) if msg.contains("no weights")));
    }
}
