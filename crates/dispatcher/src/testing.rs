//! Scriptable sink shared by the unit tests

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use contracts::{
    ContractError, DataSink, Frame, HealthCell, PixelFormat, SinkHealth, SinkItem,
    TelemetrySnapshot, WriteOutcome,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    Never,
    /// Every write fails with a transient error
    Always,
    /// Write number `n` (1-based) fails fatally
    FatalAt(usize),
}

pub(crate) struct RecordingSink {
    name: String,
    seen: Arc<Mutex<Vec<(&'static str, u64)>>>,
    last_snapshot: Arc<Mutex<Option<Arc<TelemetrySnapshot>>>>,
    delay: Duration,
    failure: Failure,
    writes: usize,
}

impl RecordingSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            seen: Arc::default(),
            last_snapshot: Arc::default(),
            delay: Duration::ZERO,
            failure: Failure::Never,
            writes: 0,
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failure(mut self, failure: Failure) -> Self {
        self.failure = failure;
        self
    }

    /// `(kind, sequence)` of every delivered item
    pub fn log(&self) -> Arc<Mutex<Vec<(&'static str, u64)>>> {
        Arc::clone(&self.seen)
    }

    /// Most recent telemetry delivered
    pub fn last_snapshot(&self) -> Arc<Mutex<Option<Arc<TelemetrySnapshot>>>> {
        Arc::clone(&self.last_snapshot)
    }
}

impl DataSink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self, health: HealthCell) -> Result<(), ContractError> {
        health.set(SinkHealth::Connected);
        Ok(())
    }

    async fn write(&mut self, item: &SinkItem) -> Result<WriteOutcome, ContractError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.writes += 1;
        match self.failure {
            Failure::Always => {
                return Err(ContractError::sink_write(&self.name, "scripted failure"))
            }
            Failure::FatalAt(n) if n == self.writes => {
                return Err(ContractError::sink_fatal(&self.name, "scripted fatal failure"))
            }
            _ => {}
        }
        if let SinkItem::Telemetry(snapshot) = item {
            *self.last_snapshot.lock().unwrap() = Some(Arc::clone(snapshot));
        }
        self.seen.lock().unwrap().push((item.kind(), item.sequence()));
        Ok(WriteOutcome::Delivered)
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        Ok(())
    }
}

pub(crate) fn frame(sequence: u64) -> Frame {
    Frame {
        sequence,
        timestamp: sequence as f64 / 30.0,
        width: 2,
        height: 1,
        format: PixelFormat::Bgr8,
        data: Bytes::from(vec![sequence as u8; 6]),
    }
}

pub(crate) fn frame_item(sequence: u64) -> SinkItem {
    SinkItem::Frame(frame(sequence))
}

pub(crate) fn snapshot(sequence: u64) -> TelemetrySnapshot {
    TelemetrySnapshot::new(sequence, sequence as f64).with_metric("cpu_usage", 12.5)
}
