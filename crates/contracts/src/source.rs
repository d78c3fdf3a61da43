//! Capture and metric backend boundaries
//!
//! The hardware capture pipeline and the system metric sampler live outside
//! skyrelay. They are polled, never awaited, so a slow backend can only make
//! a source miss a value; it can never stall the Dispatcher.

use std::collections::BTreeMap;

use crate::{ContractError, RawFrame};

/// Metric name -> value as produced by a sampler
pub type MetricSet = BTreeMap<String, f64>;

/// External capture collaborator
///
/// Owns reconnect/retry of the physical camera.
pub trait CaptureBackend: Send + 'static {
    /// Return the next decoded frame if one is ready
    ///
    /// Must not block. `Ok(None)` means nothing new since the last poll.
    fn poll_frame(&mut self) -> Result<Option<RawFrame>, ContractError>;

    /// Nominal capture rate (frames per second)
    fn rate_hint(&self) -> f64;
}

/// External system metric sampler
pub trait MetricSampler: Send + 'static {
    /// Sample the current metric set, `Ok(None)` if nothing is available yet
    fn poll_metrics(&mut self) -> Result<Option<MetricSet>, ContractError>;
}
