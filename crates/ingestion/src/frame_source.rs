//! Camera frame source

use std::sync::Arc;

use contracts::{CaptureBackend, Frame};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{IngestionError, Result};
use crate::source::{period_for, spawn_poller, Feed, SourceMetrics, SourceStats};

/// Latest-frame view handed to consumers
pub type FrameFeed = Feed<Frame>;

/// Polls a [`CaptureBackend`] and keeps the newest frame
pub struct FrameSource {
    feed: FrameFeed,
    metrics: Arc<SourceMetrics>,
    task: JoinHandle<()>,
}

impl FrameSource {
    /// Start polling `backend` at `poll_hz`
    ///
    /// Poll faster than the camera's nominal rate; polls that find nothing
    /// new are cheap.
    pub fn spawn<B: CaptureBackend>(
        mut backend: B,
        poll_hz: f64,
        cancel: CancellationToken,
    ) -> Self {
        info!(poll_hz, rate_hint = backend.rate_hint(), "starting frame source");
        let poller = spawn_poller(
            "capture",
            move || backend.poll_frame().map(|raw| raw.map(Frame::from)),
            period_for(poll_hz),
            cancel,
        );
        Self {
            feed: poller.feed,
            metrics: poller.metrics,
            task: poller.task,
        }
    }

    /// Most recent frame
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.feed.latest()
    }

    /// Smoothed capture rate (fps)
    pub fn rate(&self) -> f64 {
        self.feed.rate()
    }

    /// Cloneable view for consumers
    pub fn feed(&self) -> FrameFeed {
        self.feed.clone()
    }

    pub fn stats(&self) -> SourceStats {
        self.metrics.snapshot()
    }

    /// Wait for the poll task after its token was cancelled
    pub async fn join(self) -> Result<()> {
        self.task.await.map_err(|e| IngestionError::TaskFailed {
            source_name: "capture".to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCaptureBackend, MockCaptureConfig};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn publishes_frames_from_backend() {
        let cancel = CancellationToken::new();
        let backend = MockCaptureBackend::new(MockCaptureConfig {
            width: 4,
            height: 2,
            fps: 25.0,
            ..Default::default()
        });
        let source = FrameSource::spawn(backend, 100.0, cancel.clone());

        tokio::time::sleep(Duration::from_secs(2)).await;

        let frame = source.latest().expect("frame published");
        assert_eq!(frame.width, 4);
        assert_eq!(frame.data.len(), 4 * 2 * 3);
        assert!((source.rate() - 25.0).abs() < 1.0, "rate {}", source.rate());

        cancel.cancel();
        source.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_before_first_frame() {
        let cancel = CancellationToken::new();
        let backend = MockCaptureBackend::new(MockCaptureConfig {
            fps: 0.5,
            ..MockCaptureConfig::tiny()
        });
        let source = FrameSource::spawn(backend, 50.0, cancel.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(source.latest().is_none());
        assert_eq!(source.rate(), 0.0);

        cancel.cancel();
        source.join().await.unwrap();
    }
}
