//! Smoothed production-rate tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::time::Instant;

/// Lock-free f64 rate shared with readers
#[derive(Debug, Clone, Default)]
pub struct SharedRate(Arc<AtomicU64>);

impl SharedRate {
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, rate: f64) {
        self.0.store(rate.to_bits(), Ordering::Relaxed);
    }
}

/// Exponential moving average of the arrival rate (events per second)
#[derive(Debug)]
pub struct RateMeter {
    alpha: f64,
    smoothed: f64,
    last: Option<Instant>,
    shared: SharedRate,
}

impl RateMeter {
    /// Create a meter; `alpha` is the weight of the newest sample
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.01, 1.0),
            smoothed: 0.0,
            last: None,
            shared: SharedRate::default(),
        }
    }

    /// Create a meter publishing into an existing handle
    pub fn with_shared(alpha: f64, shared: SharedRate) -> Self {
        Self {
            shared,
            ..Self::new(alpha)
        }
    }

    /// Reader handle
    pub fn shared(&self) -> SharedRate {
        self.shared.clone()
    }

    /// Record an arrival
    pub fn record(&mut self, now: Instant) {
        if let Some(last) = self.last {
            let dt = now.saturating_duration_since(last).as_secs_f64();
            if dt > 0.0 {
                let instant = 1.0 / dt;
                self.smoothed = if self.smoothed == 0.0 {
                    instant
                } else {
                    self.alpha * instant + (1.0 - self.alpha) * self.smoothed
                };
            }
        }
        self.last = Some(now);
        self.shared.set(self.smoothed);
    }

    /// Called when a poll produced nothing
    ///
    /// Once the silence outlasts the current period the published rate is
    /// bounded by `1 / silence`, so a stalled producer decays towards zero.
    pub fn observe_idle(&mut self, now: Instant) {
        let Some(last) = self.last else {
            return;
        };
        let silence = now.saturating_duration_since(last).as_secs_f64();
        if silence > 0.0 && self.smoothed * silence > 1.0 {
            self.shared.set(1.0 / silence);
        }
    }

    /// Current smoothed rate
    pub fn rate(&self) -> f64 {
        self.shared.get()
    }
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new(0.2)
    }
}
