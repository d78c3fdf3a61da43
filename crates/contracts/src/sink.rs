//! DataSink trait - Dispatcher output interface
//!
//! Defines the abstract interface for Sinks and the values that flow through
//! their mailboxes.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{ContractError, Frame, TelemetrySnapshot};

/// One mailbox entry
#[derive(Debug, Clone)]
pub enum SinkItem {
    /// Captured frame
    Frame(Frame),
    /// Merged telemetry snapshot
    Telemetry(Arc<TelemetrySnapshot>),
}

impl SinkItem {
    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Frame(_) => "frame",
            Self::Telemetry(_) => "telemetry",
        }
    }

    /// Producer sequence of the wrapped value
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Frame(frame) => frame.sequence,
            Self::Telemetry(snapshot) => snapshot.sequence,
        }
    }
}

/// Sink health as observed by the Dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkHealth {
    Connected,
    Degraded,
    #[default]
    Disconnected,
}

impl SinkHealth {
    /// Numeric code merged into telemetry (0 = connected, 1 = degraded, 2 = disconnected)
    pub fn code(&self) -> u8 {
        match self {
            Self::Connected => 0,
            Self::Degraded => 1,
            Self::Disconnected => 2,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Connected,
            1 => Self::Degraded,
            _ => Self::Disconnected,
        }
    }

    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Lock-free health slot shared by a sink and its observers
#[derive(Debug, Clone)]
pub struct HealthCell(Arc<AtomicU8>);

impl HealthCell {
    /// Create a cell with an initial value
    pub fn new(initial: SinkHealth) -> Self {
        Self(Arc::new(AtomicU8::new(initial.code())))
    }

    /// Current health
    pub fn get(&self) -> SinkHealth {
        SinkHealth::from_code(self.0.load(Ordering::Acquire))
    }

    /// Replace health, returning the previous value
    pub fn set(&self, health: SinkHealth) -> SinkHealth {
        SinkHealth::from_code(self.0.swap(health.code(), Ordering::AcqRel))
    }
}

impl Default for HealthCell {
    fn default() -> Self {
        Self::new(SinkHealth::Disconnected)
    }
}

/// What a successful `write` did with its item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Handed to the sink's transport
    Delivered,
    /// Read from the mailbox and dropped, e.g. while a session is down
    Discarded,
}

/// Data output trait
///
/// All sink implementations must implement this trait. The worker owning the
/// sink calls `open` once, then `write` for every mailbox item in order, then
/// `flush` and `close` on shutdown.
#[trait_variant::make(DataSink: Send)]
pub trait LocalDataSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Acquire the sink's transport/session
    ///
    /// `health` is the cell the Dispatcher observes; the sink keeps it current.
    async fn open(&mut self, health: HealthCell) -> Result<(), ContractError>;

    /// Deliver one item
    ///
    /// # Errors
    /// Returns write error (should include context). Errors for which
    /// [`ContractError::is_fatal`] holds stop the worker. An item the sink
    /// chose to drop is reported as [`WriteOutcome::Discarded`], not as an error.
    async fn write(&mut self, item: &SinkItem) -> Result<WriteOutcome, ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_cell_swap() {
        let cell = HealthCell::new(SinkHealth::Degraded);
        let observer = cell.clone();
        assert_eq!(cell.set(SinkHealth::Connected), SinkHealth::Degraded);
        assert_eq!(observer.get(), SinkHealth::Connected);
    }

    #[test]
    fn health_codes() {
        assert_eq!(SinkHealth::Connected.code(), 0);
        assert_eq!(SinkHealth::Disconnected.code(), 2);
        assert_eq!(HealthCell::default().get(), SinkHealth::Disconnected);
    }
}
