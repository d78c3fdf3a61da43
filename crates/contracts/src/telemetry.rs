//! TelemetrySnapshot - TelemetrySource output
//!
//! Named numeric metrics sampled at one instant, plus the derived fields the
//! Dispatcher merges in before fan-out.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Telemetry snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Snapshot sequence, strictly increasing per TelemetrySource
    pub sequence: u64,

    /// Sample timestamp (seconds)
    pub timestamp: f64,

    /// Metric name -> value (keys are stable strings, ordered for stable output)
    pub metrics: BTreeMap<String, f64>,
}

impl TelemetrySnapshot {
    /// Create an empty snapshot
    pub fn new(sequence: u64, timestamp: f64) -> Self {
        Self {
            sequence,
            timestamp,
            metrics: BTreeMap::new(),
        }
    }

    /// Builder-style insert
    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    /// Insert or replace a metric
    pub fn set(&mut self, key: impl Into<String>, value: f64) {
        self.metrics.insert(key.into(), value);
    }

    /// Get a metric value
    pub fn get(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }

    /// Merge derived fields; derived values win over sampled ones
    pub fn merge<I, K>(&mut self, derived: I)
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        for (key, value) in derived {
            self.metrics.insert(key.into(), value);
        }
    }
}
