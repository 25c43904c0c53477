//! Detector backed by a long-lived model worker process.
//!
//! The worker receives the model path as its last argument, prints
//! `{"ready":true}` once the model is loaded, then answers one JSON line per
//! request line on stdout.

use std::io::Cursor;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::detector::{BoxPrediction, Detector, Prediction};
use super::ServeError;

#[derive(Serialize)]
struct WorkerRequest<'a> {
    id: u64,
    image: &'a str,
}

#[derive(Deserialize)]
struct WorkerResponse {
    id: u64,
    #[serde(default)]
    boxes: Vec<BoxPrediction>,
    #[serde(default)]
    inference_time: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ReadyLine {
    ready: bool,
}

struct WorkerPipes {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    // Held so the process lives (and is killed) with the detector.
    _child: Child,
}

pub struct WorkerDetector {
    pipes: Mutex<WorkerPipes>,
    next_id: AtomicU64,
}

impl WorkerDetector {
    /// Start the worker and wait for it to report the model as loaded.
    ///
    /// # Errors
    /// Returns [`ServeError::Startup`] if the model file is missing, the
    /// command cannot be spawned, or no ready line arrives within
    /// `startup_timeout`.
    pub async fn spawn(command: &[String], model_path: &Path, startup_timeout: Duration) -> Result<Self, ServeError> {
        if !model_path.is_file() {
            return Err(ServeError::Startup(format!("model artifact not found: {}", model_path.display())));
        }
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ServeError::Startup("serve.worker_command is empty".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .arg(model_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ServeError::Startup(format!("failed to spawn {program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ServeError::Startup("failed to get stdin handle".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ServeError::Startup("failed to get stdout handle".to_string()))?;
        let mut stdout = BufReader::new(stdout).lines();

        tokio::time::timeout(startup_timeout, wait_ready(&mut stdout))
            .await
            .map_err(|_| ServeError::Startup(format!("model worker not ready after {startup_timeout:?}")))??;
        info!(model = %model_path.display(), worker = %program, "model worker ready");

        Ok(Self {
            pipes: Mutex::new(WorkerPipes { stdin, stdout, _child: child }),
            next_id: AtomicU64::new(1),
        })
    }
}

async fn wait_ready(stdout: &mut Lines<BufReader<ChildStdout>>) -> Result<(), ServeError> {
    while let Some(line) = stdout.next_line().await? {
        match serde_json::from_str::<ReadyLine>(&line) {
            Ok(ReadyLine { ready: true }) => return Ok(()),
            _ => debug!(line = %line, "worker startup output"),
        }
    }
    Err(ServeError::Startup("model worker exited before becoming ready".to_string()))
}

fn encode_png(image: &DynamicImage) -> Result<String, ServeError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| ServeError::Worker(format!("failed to encode image: {e}")))?;
    Ok(STANDARD.encode(buf))
}

#[async_trait]
impl Detector for WorkerDetector {
    async fn detect(&self, image: DynamicImage) -> Result<Prediction, ServeError> {
        let encoded = encode_png(&image)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&WorkerRequest { id, image: &encoded })?;
        line.push('\n');

        let mut pipes = self.pipes.lock().await;
        let started = Instant::now();
        pipes.stdin.write_all(line.as_bytes()).await?;
        pipes.stdin.flush().await?;

        loop {
            let reply = pipes
                .stdout
                .next_line()
                .await?
                .ok_or_else(|| ServeError::Worker("model worker closed its output".to_string()))?;
            let response: WorkerResponse = match serde_json::from_str(&reply) {
                Ok(response) => response,
                Err(_) => {
                    debug!(line = %reply, "ignoring non-JSON worker output");
                    continue;
                }
            };
            if response.id != id {
                warn!(expected = id, got = response.id, "discarding stale worker response");
                continue;
            }
            if let Some(error) = response.error {
                return Err(ServeError::Worker(error));
            }

            let measured = started.elapsed().as_secs_f64() * 1000.0;
            let inference_time =
                response.inference_time.filter(|t| t.is_finite() && *t >= 0.0).unwrap_or(measured);
            return Ok(Prediction { boxes: response.boxes, inference_time });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::TempDir;

    const ECHO_WORKER: &str = r#"
[ -f "$1" ] || exit 1
echo "loading $1"
echo '{"ready":true}'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed 's/^{"id":\([0-9]*\).*/\1/')
  echo "{\"id\":$id,\"boxes\":[{\"xyxy\":[1.0,2.0,30.0,40.0],\"class_id\":2}]}"
done
"#;

    struct Fixture {
        temp: TempDir,
    }

    impl Fixture {
        fn new(script: &str) -> Self {
            let temp = TempDir::new().unwrap();
            std::fs::write(temp.path().join("worker.sh"), script).unwrap();
            std::fs::write(temp.path().join("best.pt"), b"weights").unwrap();
            Self { temp }
        }

        fn command(&self) -> Vec<String> {
            vec!["sh".to_string(), self.temp.path().join("worker.sh").display().to_string()]
        }

        fn model(&self) -> std::path::PathBuf {
            self.temp.path().join("best.pt")
        }
    }

    fn image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(8, 6))
    }

    #[tokio::test]
    async fn test_worker_round_trip() {
        let fixture = Fixture::new(ECHO_WORKER);
        let detector = WorkerDetector::spawn(&fixture.command(), &fixture.model(), Duration::from_secs(10))
            .await
            .unwrap();

        for _ in 0..2 {
            let prediction = detector.detect(image()).await.unwrap();
            assert_eq!(prediction.boxes, vec![BoxPrediction { xyxy: [1.0, 2.0, 30.0, 40.0], class_id: 2 }]);
            assert!(prediction.inference_time >= 0.0);
        }
    }

    #[tokio::test]
    async fn test_reported_inference_time_wins() {
        let fixture = Fixture::new(
            r#"echo '{"ready":true}'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed 's/^{"id":\([0-9]*\).*/\1/')
  echo "{\"id\":$id,\"boxes\":[],\"inference_time\":12.5}"
done
"#,
        );
        let detector = WorkerDetector::spawn(&fixture.command(), &fixture.model(), Duration::from_secs(10))
            .await
            .unwrap();

        let prediction = detector.detect(image()).await.unwrap();
        assert!(prediction.boxes.is_empty());
        assert!((prediction.inference_time - 12.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_missing_model_is_fatal() {
        let fixture = Fixture::new(ECHO_WORKER);
        let missing = fixture.temp.path().join("missing.pt");
        let err = WorkerDetector::spawn(&fixture.command(), &missing, Duration::from_secs(10))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServeError::Startup(_)));
    }

    #[tokio::test]
    async fn test_worker_exiting_before_ready_is_fatal() {
        let fixture = Fixture::new("echo 'cannot load model' >&2\nexit 1\n");
        let err = WorkerDetector::spawn(&fixture.command(), &fixture.model(), Duration::from_secs(10))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServeError::Startup(_)));
    }

    #[tokio::test]
    async fn test_worker_error_is_reported() {
        let fixture = Fixture::new(
            r#"echo '{"ready":true}'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed 's/^{"id":\([0-9]*\).*/\1/')
  echo "{\"id\":$id,\"error\":\"cuda unavailable\"}"
done
"#,
        );
        let detector = WorkerDetector::spawn(&fixture.command(), &fixture.model(), Duration::from_secs(10))
            .await
            .unwrap();

        let err = detector.detect(image()).await.unwrap_err();
        assert!(matches!(err, ServeError::Worker(msg) if msg == "cuda unavailable"));
    }
}
