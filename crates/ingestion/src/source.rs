//! Shared polling machinery for frame and telemetry sources

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{ContractError, Frame, TelemetrySnapshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::rate::{RateMeter, SharedRate};
use crate::slot::{latest_slot, LatestReader, LatestSlot};

/// Values with a producer-assigned, strictly increasing sequence
pub trait Sequenced {
    fn sequence(&self) -> u64;
}

impl Sequenced for Frame {
    fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Sequenced for TelemetrySnapshot {
    fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Read-only view of a source: latest value plus smoothed rate
#[derive(Debug)]
pub struct Feed<T> {
    reader: LatestReader<T>,
    rate: SharedRate,
}

impl<T> Clone for Feed<T> {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
            rate: self.rate.clone(),
        }
    }
}

impl<T> Feed<T> {
    /// Build a feed over an existing slot (tests, external producers)
    pub fn new(reader: LatestReader<T>, rate: SharedRate) -> Self {
        Self { reader, rate }
    }

    /// Most recent value, absent until the first one arrives
    pub fn latest(&self) -> Option<Arc<T>> {
        self.reader.latest()
    }

    /// Smoothed production rate in Hz
    pub fn rate(&self) -> f64 {
        self.rate.get()
    }

    /// Underlying reader, for waiting on changes
    pub fn reader(&self) -> LatestReader<T> {
        self.reader.clone()
    }
}

/// Source counters
#[derive(Debug, Default)]
pub struct SourceMetrics {
    /// Polls performed
    pub polls: AtomicU64,
    /// Values published
    pub published: AtomicU64,
    /// Values rejected for a non-increasing sequence
    pub stale: AtomicU64,
    /// Backend failures
    pub errors: AtomicU64,
}

impl SourceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    fn record_stale(&self) {
        self.stale.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> SourceStats {
        SourceStats {
            polls: self.polls.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Source counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub polls: u64,
    pub published: u64,
    pub stale: u64,
    pub errors: u64,
}

/// Running poll task
pub(crate) struct Poller<T> {
    pub(crate) feed: Feed<T>,
    pub(crate) metrics: Arc<SourceMetrics>,
    pub(crate) task: JoinHandle<()>,
}

/// Spawn the poll loop for one source
///
/// `poll` is invoked once per period and must not block.
pub(crate) fn spawn_poller<T, P>(
    name: &'static str,
    poll: P,
    period: Duration,
    cancel: CancellationToken,
) -> Poller<T>
where
    T: Sequenced + Send + Sync + 'static,
    P: FnMut() -> Result<Option<T>, ContractError> + Send + 'static,
{
    let (slot, reader) = latest_slot();
    let meter = RateMeter::default();
    let feed = Feed::new(reader, meter.shared());
    let metrics = Arc::new(SourceMetrics::new());

    let task = tokio::spawn(poll_loop(
        name,
        poll,
        slot,
        meter,
        Arc::clone(&metrics),
        period,
        cancel,
    ));

    Poller {
        feed,
        metrics,
        task,
    }
}

async fn poll_loop<T, P>(
    name: &'static str,
    mut poll: P,
    slot: LatestSlot<T>,
    mut meter: RateMeter,
    metrics: Arc<SourceMetrics>,
    period: Duration,
    cancel: CancellationToken,
) where
    T: Sequenced + Send + Sync + 'static,
    P: FnMut() -> Result<Option<T>, ContractError> + Send + 'static,
{
    debug!(source = name, period_ms = period.as_millis() as u64, "source poller started");

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_sequence: Option<u64> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        metrics.record_poll();
        let now = Instant::now();

        match poll() {
            Ok(Some(value)) => {
                let sequence = value.sequence();
                if last_sequence.is_some_and(|last| sequence <= last) {
                    metrics.record_stale();
                    trace!(source = name, sequence, "dropping non-increasing sequence");
                    meter.observe_idle(now);
                    continue;
                }
                last_sequence = Some(sequence);
                meter.record(now);
                slot.publish(value);
                metrics.record_published();
                metrics::counter!("skyrelay_source_published_total", "source" => name)
                    .increment(1);
            }
            Ok(None) => meter.observe_idle(now),
            Err(e) => {
                metrics.record_error();
                metrics::counter!("skyrelay_source_errors_total", "source" => name).increment(1);
                warn!(source = name, error = %e, "source poll failed");
                meter.observe_idle(now);
            }
        }
    }

    debug!(source = name, "source poller stopped");
}

/// Poll period for a rate in Hz
pub(crate) fn period_for(rate_hz: f64) -> Duration {
    if rate_hz.is_finite() && rate_hz > 0.0 {
        Duration::from_secs_f64(1.0 / rate_hz)
    } else {
        Duration::from_millis(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Seq(u64);

    impl Sequenced for Seq {
        fn sequence(&self) -> u64 {
            self.0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_non_increasing_sequences() {
        let mut script =
            vec![Ok(Some(Seq(1))), Ok(Some(Seq(3))), Ok(Some(Seq(2))), Ok(Some(Seq(3)))]
                .into_iter();
        let cancel = CancellationToken::new();
        let poller = spawn_poller(
            "test",
            move || script.next().unwrap_or(Ok(None)),
            Duration::from_millis(10),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(poller.feed.latest().map(|s| s.0), Some(3));
        let stats = poller.metrics.snapshot();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.stale, 2);

        cancel.cancel();
        poller.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn backend_error_is_no_new_value() {
        let mut script = vec![
            Ok(Some(Seq(1))),
            Err(ContractError::transient("device busy")),
            Ok(None),
        ]
        .into_iter();
        let cancel = CancellationToken::new();
        let poller = spawn_poller(
            "test",
            move || script.next().unwrap_or(Ok(None)),
            Duration::from_millis(10),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(poller.feed.latest().map(|s| s.0), Some(1));
        assert_eq!(poller.metrics.snapshot().errors, 1);

        cancel.cancel();
        poller.task.await.unwrap();
    }

    #[test]
    fn period_falls_back_on_bad_rate() {
        assert_eq!(period_for(10.0), Duration::from_millis(100));
        assert_eq!(period_for(0.0), Duration::from_millis(100));
        assert_eq!(period_for(f64::NAN), Duration::from_millis(100));
    }
}
