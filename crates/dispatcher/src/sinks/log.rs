//! LogSink - logs item summaries via tracing

use contracts::{ContractError, DataSink, HealthCell, SinkHealth, SinkItem, WriteOutcome};
use tracing::{debug, info, instrument};

/// Sink that logs item summaries for diagnostics
///
/// Every item is logged at `debug`; one `info` line per `summary_every` frames.
pub struct LogSink {
    name: String,
    summary_every: u64,
    frames: u64,
    snapshots: u64,
    bytes: u64,
}

impl LogSink {
    /// Create a new LogSink with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary_every: 30,
            frames: 0,
            snapshots: 0,
            bytes: 0,
        }
    }

    /// Emit the `info` summary every `n` frames (minimum 1)
    pub fn summary_every(mut self, n: u64) -> Self {
        self.summary_every = n.max(1);
        self
    }

    fn log_item(&mut self, item: &SinkItem) {
        match item {
            SinkItem::Frame(frame) => {
                self.frames += 1;
                self.bytes += frame.len() as u64;
                debug!(
                    sink = %self.name,
                    seq = frame.sequence,
                    width = frame.width,
                    height = frame.height,
                    bytes = frame.len(),
                    "Frame received"
                );
                if self.frames.is_multiple_of(self.summary_every) {
                    info!(
                        sink = %self.name,
                        frames = self.frames,
                        snapshots = self.snapshots,
                        mib = self.bytes as f64 / (1024.0 * 1024.0),
                        "Log sink progress"
                    );
                }
            }
            SinkItem::Telemetry(snapshot) => {
                self.snapshots += 1;
                debug!(
                    sink = %self.name,
                    seq = snapshot.sequence,
                    metrics = snapshot.metrics.len(),
                    "Telemetry received"
                );
            }
        }
    }
}

impl DataSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self, health: HealthCell) -> Result<(), ContractError> {
        health.set(SinkHealth::Connected);
        Ok(())
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, item),
        fields(sink = %self.name, seq = item.sequence())
    )]
    async fn write(&mut self, item: &SinkItem) -> Result<WriteOutcome, ContractError> {
        self.log_item(item);
        Ok(WriteOutcome::Delivered)
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(
            sink = %self.name,
            frames = self.frames,
            snapshots = self.snapshots,
            "LogSink closed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{frame_item, snapshot};
    use std::sync::Arc;

    #[tokio::test]
    async fn counts_frames_and_snapshots() {
        let mut sink = LogSink::new("diag").summary_every(2);
        let health = HealthCell::default();
        sink.open(health.clone()).await.unwrap();
        assert_eq!(health.get(), SinkHealth::Connected);

        for i in 1..=3 {
            sink.write(&frame_item(i)).await.unwrap();
        }
        sink.write(&SinkItem::Telemetry(Arc::new(snapshot(1)))).await.unwrap();

        assert_eq!(sink.frames, 3);
        assert_eq!(sink.snapshots, 1);
        assert_eq!(sink.bytes, 18);
        assert!(sink.close().await.is_ok());
    }

    #[test]
    fn name_is_kept() {
        let sink = LogSink::new("my_logger");
        assert_eq!(sink.name(), "my_logger");
    }
}
