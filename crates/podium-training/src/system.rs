//! Host utilisation sampled alongside a training run.

use crate::tracking::MetricPoint;
use std::collections::BTreeMap;
use std::time::Duration;
use sysinfo::System;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const CPU_UTILIZATION: &str = "system/cpu_utilization_percentage";
pub const MEMORY_USAGE_MB: &str = "system/system_memory_usage_megabytes";
pub const MEMORY_USAGE_PERCENT: &str = "system/system_memory_usage_percentage";

/// Background sampler of CPU and memory usage.
///
/// Samples are taken every `interval` until [`SystemMonitor::stop`], plus one
/// final sample at stop, so even a short run gets a data point. Dropping the
/// monitor without stopping it ends the sampling task.
pub struct SystemMonitor {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Vec<HostSample>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct HostSample {
    cpu_percent: f64,
    memory_mb: f64,
    memory_percent: f64,
}

impl HostSample {
    fn read(sys: &mut System) -> Self {
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        let total = sys.total_memory();
        let used = sys.used_memory();
        let memory_percent = if total == 0 { 0.0 } else { used as f64 / total as f64 * 100.0 };
        Self {
            cpu_percent: f64::from(sys.global_cpu_usage()),
            memory_mb: used as f64 / 1024.0 / 1024.0,
            memory_percent,
        }
    }
}

impl SystemMonitor {
    /// Start sampling on the current tokio runtime.
    #[must_use]
    pub fn start(interval: Duration) -> Self {
        let interval = interval.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        let (stop, mut stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut sys = System::new();
            sys.refresh_cpu_usage();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; CPU usage needs a baseline first.
            ticker.tick().await;

            let mut samples = Vec::new();
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => samples.push(HostSample::read(&mut sys)),
                }
            }
            samples.push(HostSample::read(&mut sys));
            samples
        });
        Self { stop, handle }
    }

    /// Stop sampling and return the collected `system/*` series.
    pub async fn stop(self) -> BTreeMap<String, Vec<MetricPoint>> {
        let _ = self.stop.send(());
        let samples = match self.handle.await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error = %e, "system metrics sampler did not complete");
                Vec::new()
            }
        };
        debug!(samples = samples.len(), "system metrics collected");
        series(&samples)
    }
}

fn series(samples: &[HostSample]) -> BTreeMap<String, Vec<MetricPoint>> {
    let mut metrics: BTreeMap<String, Vec<MetricPoint>> = BTreeMap::new();
    for (step, sample) in samples.iter().enumerate() {
        let step = step as u64;
        for (key, value) in [
            (CPU_UTILIZATION, sample.cpu_percent),
            (MEMORY_USAGE_MB, sample.memory_mb),
            (MEMORY_USAGE_PERCENT, sample.memory_percent),
        ] {
            metrics.entry(key.to_string()).or_default().push(MetricPoint { step, value });
        }
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_monitor_collects_at_least_one_sample() {
        let monitor = SystemMonitor::start(Duration::from_millis(10));
        let metrics = monitor.stop().await;

        for key in [CPU_UTILIZATION, MEMORY_USAGE_MB, MEMORY_USAGE_PERCENT] {
            assert!(!metrics[key].is_empty(), "{key}");
        }
        assert!(metrics[MEMORY_USAGE_MB].iter().all(|p| p.value > 0.0));
        assert!(metrics[MEMORY_USAGE_PERCENT].iter().all(|p| (0.0..=100.0).contains(&p.value)));
    }

    #[tokio::test]
    async fn test_monitor_samples_on_interval() {
        let monitor = SystemMonitor::start(Duration::from_millis(250));
        tokio::time::sleep(Duration::from_millis(900)).await;
        let metrics = monitor.stop().await;

        let steps: Vec<u64> = metrics[CPU_UTILIZATION].iter().map(|p| p.step).collect();
        assert!(steps.len() >= 2, "{steps:?}");
        assert!(steps.windows(2).all(|w| w[1] == w[0] + 1));
    }
}
