use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { run_name: String },
    Message { run_name: String, message: String },
    Epoch { run_name: String, epoch: u64, total: Option<u64> },
    Finished { run_name: String },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards progress to `tracing` at info level.
#[derive(Debug, Default)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { run_name } => info!(run = %run_name, "training started"),
            ProgressEvent::Message { run_name, message } => info!(run = %run_name, "{message}"),
            ProgressEvent::Epoch { run_name, epoch, total } => {
                if let Some(total) = total {
                    info!(run = %run_name, "epoch {epoch}/{total}");
                } else {
                    info!(run = %run_name, "epoch {epoch}");
                }
            }
            ProgressEvent::Finished { run_name } => info!(run = %run_name, "training finished"),
        }
    }
}
