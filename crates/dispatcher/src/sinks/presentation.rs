//! PresentationSink - pushes to the local dashboard layer
//!
//! [`PresentationHub`] is the in-process attachment point for the HTTP /
//! WebSocket layer: frames and telemetry are re-broadcast to every viewer and
//! the newest snapshot is kept for late joiners.

use std::sync::Arc;

use contracts::{
    ContractError, DataSink, Frame, HealthCell, Presenter, SinkHealth, SinkItem, TelemetrySnapshot,
    WriteOutcome,
};
use ingestion::{latest_slot, LatestReader, LatestSlot};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Default per-viewer backlog
pub const DEFAULT_HUB_CAPACITY: usize = 16;

struct HubInner {
    frames: broadcast::Sender<Frame>,
    telemetry: broadcast::Sender<Arc<TelemetrySnapshot>>,
    latest: LatestSlot<TelemetrySnapshot>,
    latest_reader: LatestReader<TelemetrySnapshot>,
}

/// Fan-out point for dashboard viewers
///
/// Lagging viewers lose the oldest items (broadcast semantics); publishing
/// never waits for them.
#[derive(Clone)]
pub struct PresentationHub {
    inner: Arc<HubInner>,
}

impl PresentationHub {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (frames, _) = broadcast::channel(capacity);
        let (telemetry, _) = broadcast::channel(capacity);
        let (latest, latest_reader) = latest_slot();
        Self {
            inner: Arc::new(HubInner {
                frames,
                telemetry,
                latest,
                latest_reader,
            }),
        }
    }

    /// Stream of frames for one viewer (e.g. a multipart response)
    pub fn subscribe_frames(&self) -> broadcast::Receiver<Frame> {
        self.inner.frames.subscribe()
    }

    /// Stream of snapshots for one viewer (e.g. a push-update socket)
    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<Arc<TelemetrySnapshot>> {
        self.inner.telemetry.subscribe()
    }

    /// Newest snapshot, for viewers that just connected
    pub fn latest_telemetry(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.inner.latest_reader.latest()
    }

    /// Connected frame viewers
    pub fn viewers(&self) -> usize {
        self.inner.frames.receiver_count()
    }
}

impl Default for PresentationHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

impl Presenter for PresentationHub {
    async fn push_frame(&mut self, frame: &Frame) -> Result<(), ContractError> {
        // no viewers is not a failure
        self.inner.frames.send(frame.clone()).ok();
        Ok(())
    }

    async fn push_telemetry(&mut self, snapshot: &TelemetrySnapshot) -> Result<(), ContractError> {
        let snapshot = self.inner.latest.publish(snapshot.clone());
        // no viewers is not a failure
        self.inner.telemetry.send(snapshot).ok();
        Ok(())
    }
}

/// Sink forwarding to a [`Presenter`]; failures only degrade it
pub struct PresentationSink<P> {
    name: String,
    presenter: P,
    health: HealthCell,
    failures: u64,
}

impl<P: Presenter> PresentationSink<P> {
    pub fn new(name: impl Into<String>, presenter: P) -> Self {
        Self {
            name: name.into(),
            presenter,
            health: HealthCell::default(),
            failures: 0,
        }
    }
}

impl<P: Presenter> DataSink for PresentationSink<P> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self, health: HealthCell) -> Result<(), ContractError> {
        health.set(SinkHealth::Connected);
        self.health = health;
        Ok(())
    }

    async fn write(&mut self, item: &SinkItem) -> Result<WriteOutcome, ContractError> {
        let result = match item {
            SinkItem::Frame(frame) => self.presenter.push_frame(frame).await,
            SinkItem::Telemetry(snapshot) => self.presenter.push_telemetry(snapshot).await,
        };

        match result {
            Ok(()) => {
                if self.health.set(SinkHealth::Connected) == SinkHealth::Degraded {
                    info!(sink = %self.name, "Presentation layer recovered");
                }
                Ok(WriteOutcome::Delivered)
            }
            Err(e) => {
                self.failures += 1;
                if self.health.set(SinkHealth::Degraded) == SinkHealth::Connected {
                    warn!(sink = %self.name, error = %e, "Presentation layer degraded");
                }
                // never fatal
                Err(ContractError::sink_write(&self.name, e.to_string()))
            }
        }
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "presentation_sink_close", skip(self), fields(sink = %self.name))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, failures = self.failures, "PresentationSink closed");
        Ok(())
    }
}
