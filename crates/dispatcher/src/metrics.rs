//! Sink metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use contracts::{HealthCell, SinkHealth, SinkType};
use ingestion::SharedRate;
use serde::Serialize;

/// Metrics for a single sink
///
/// Shared between the Dispatcher (offers), the sink worker (writes) and
/// status queries. Survives restarts of the worker.
#[derive(Debug)]
pub struct SinkMetrics {
    /// Current queue length
    queue_len: AtomicUsize,
    /// Total successful writes
    write_count: AtomicU64,
    /// Total write failures
    failure_count: AtomicU64,
    /// Items displaced by the drop-oldest policy
    dropped_count: AtomicU64,
    /// Items discarded by the sink, at stop, or after a fatal error
    discarded_count: AtomicU64,
    restart_count: AtomicU64,
    delivery_rate: SharedRate,
    health: HealthCell,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self {
            queue_len: AtomicUsize::new(0),
            write_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
            discarded_count: AtomicU64::new(0),
            restart_count: AtomicU64::new(0),
            delivery_rate: SharedRate::default(),
            health: HealthCell::new(SinkHealth::Degraded),
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    pub fn inc_write_count(&self) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn inc_dropped_count(&self) {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn discarded_count(&self) -> u64 {
        self.discarded_count.load(Ordering::Relaxed)
    }

    pub fn add_discarded(&self, n: usize) {
        self.discarded_count.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn restart_count(&self) -> u64 {
        self.restart_count.load(Ordering::Relaxed)
    }

    pub fn inc_restart_count(&self) {
        self.restart_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Smoothed successful writes per second, written by the worker
    pub fn delivery_rate(&self) -> &SharedRate {
        &self.delivery_rate
    }

    /// Health cell handed to the sink on `open`
    pub fn health_cell(&self) -> &HealthCell {
        &self.health
    }

    pub fn health(&self) -> SinkHealth {
        self.health.get()
    }

    /// Get snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            write_count: self.write_count(),
            failure_count: self.failure_count(),
            dropped_count: self.dropped_count(),
            discarded_count: self.discarded_count(),
            restart_count: self.restart_count(),
            delivery_rate: self.delivery_rate.get(),
        }
    }
}

impl Default for SinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of sink counters (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub write_count: u64,
    pub failure_count: u64,
    pub dropped_count: u64,
    pub discarded_count: u64,
    pub restart_count: u64,
    pub delivery_rate: f64,
}

/// Externally visible state of one sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkStatus {
    pub name: String,
    pub sink_type: Option<SinkType>,
    pub health: SinkHealth,
    pub capacity: usize,
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_degraded_with_zeroed_counters() {
        let metrics = SinkMetrics::new();
        assert_eq!(metrics.health(), SinkHealth::Degraded);
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn health_cell_is_shared() {
        let metrics = SinkMetrics::new();
        let cell = metrics.health_cell().clone();
        cell.set(SinkHealth::Connected);
        assert_eq!(metrics.health(), SinkHealth::Connected);
    }

    #[test]
    fn status_serializes_flat() {
        let metrics = SinkMetrics::new();
        metrics.inc_dropped_count();
        metrics.add_discarded(2);
        let status = SinkStatus {
            name: "uplink".into(),
            sink_type: Some(SinkType::Transmitter),
            health: metrics.health(),
            capacity: 4,
            metrics: metrics.snapshot(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["sink_type"], "transmitter");
        assert_eq!(json["health"], "degraded");
        assert_eq!(json["dropped_count"], 1);
        assert_eq!(json["discarded_count"], 2);
    }
}
