//! Telemetry source

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use contracts::{MetricSampler, TelemetrySnapshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{IngestionError, Result};
use crate::source::{period_for, spawn_poller, Feed, SourceMetrics, SourceStats};

/// Latest-telemetry view handed to consumers
pub type TelemetryFeed = Feed<TelemetrySnapshot>;

/// Samples a [`MetricSampler`] and keeps the newest snapshot
///
/// The source assigns sequence numbers and wall-clock timestamps; the
/// sampler only provides metric values.
pub struct TelemetrySource {
    feed: TelemetryFeed,
    metrics: Arc<SourceMetrics>,
    task: JoinHandle<()>,
}

impl TelemetrySource {
    pub fn spawn<S: MetricSampler>(
        mut sampler: S,
        sample_hz: f64,
        cancel: CancellationToken,
    ) -> Self {
        info!(sample_hz, "starting telemetry source");
        let mut sequence = 0u64;
        let poller = spawn_poller(
            "telemetry",
            move || {
                let Some(metrics) = sampler.poll_metrics()? else {
                    return Ok(None);
                };
                sequence += 1;
                let mut snapshot = TelemetrySnapshot::new(sequence, wall_clock_secs());
                snapshot.merge(metrics);
                Ok(Some(snapshot))
            },
            period_for(sample_hz),
            cancel,
        );
        Self {
            feed: poller.feed,
            metrics: poller.metrics,
            task: poller.task,
        }
    }

    pub fn latest(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.feed.latest()
    }

    /// Smoothed sample rate (Hz)
    pub fn rate(&self) -> f64 {
        self.feed.rate()
    }

    pub fn feed(&self) -> TelemetryFeed {
        self.feed.clone()
    }

    pub fn stats(&self) -> SourceStats {
        self.metrics.snapshot()
    }

    pub async fn join(self) -> Result<()> {
        self.task.await.map_err(|e| IngestionError::TaskFailed {
            source_name: "telemetry".to_string(),
            message: e.to_string(),
        })
    }
}

fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
