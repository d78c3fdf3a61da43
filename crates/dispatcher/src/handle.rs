//! SinkHandle - manages a sink with isolated mailbox and worker task

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use contracts::{ContractError, DataSink, SinkHealth, SinkItem, SinkType, WriteOutcome};
use ingestion::RateMeter;
use observability::metrics::{
    record_sink_delivery, record_sink_health, record_sink_offer, OfferOutcome,
};

use crate::error::DispatcherError;
use crate::mailbox::{mailbox, MailboxClosed, MailboxReceiver, MailboxSender, Offer};
use crate::metrics::{SinkMetrics, SinkStatus};

/// Idle interval after which the delivery rate starts decaying
const IDLE_PROBE: Duration = Duration::from_secs(1);

struct Worker {
    tx: MailboxSender<SinkItem>,
    task: JoinHandle<()>,
}

type Starter = Box<dyn FnMut(&Arc<SinkMetrics>, usize) -> Result<Worker, ContractError> + Send>;

/// How a worker ended on `stop`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Mailbox drained, sink flushed and closed
    Drained,
    /// Grace period elapsed; the worker was aborted
    ForceClosed { discarded: usize },
    /// No worker was running
    NotRunning,
}

/// Handle to a running sink worker
pub struct SinkHandle {
    name: String,
    sink_type: Option<SinkType>,
    capacity: usize,
    metrics: Arc<SinkMetrics>,
    worker: Option<Worker>,
    starter: Starter,
}

impl SinkHandle {
    /// Start a worker for an already-built sink
    ///
    /// The sink cannot be rebuilt, so `restart` fails for handles created here.
    pub fn spawn<S: DataSink + Send + 'static>(sink: S, capacity: usize) -> Self {
        let name = sink.name().to_string();
        let mut slot = Some(sink);
        let mut handle = Self::unstarted(name, capacity, move || {
            slot.take()
                .ok_or_else(|| ContractError::Other("sink was not built from a factory".into()))
        });
        // the slot is full on the first call
        if let Err(e) = handle.start() {
            error!(sink = %handle.name, error = %e, "Sink failed to start");
        }
        handle
    }

    /// Start a worker from a factory that can rebuild the sink on `restart`
    pub fn spawn_restartable<S, F>(
        name: impl Into<String>,
        factory: F,
        capacity: usize,
    ) -> Result<Self, DispatcherError>
    where
        S: DataSink + Send + 'static,
        F: FnMut() -> Result<S, ContractError> + Send + 'static,
    {
        let mut handle = Self::unstarted(name.into(), capacity, factory);
        handle
            .start()
            .map_err(|e| DispatcherError::sink_creation(&handle.name, e.to_string()))?;
        Ok(handle)
    }

    /// Tag the handle with its configured type (reported in status)
    pub fn with_type(mut self, sink_type: SinkType) -> Self {
        self.sink_type = Some(sink_type);
        self
    }

    fn unstarted<S, F>(name: String, capacity: usize, mut factory: F) -> Self
    where
        S: DataSink + Send + 'static,
        F: FnMut() -> Result<S, ContractError> + Send + 'static,
    {
        let starter: Starter = Box::new(move |metrics, capacity| {
            let sink = factory()?;
            Ok(start_worker(sink, Arc::clone(metrics), capacity))
        });
        Self {
            name,
            sink_type: None,
            capacity: capacity.max(1),
            metrics: Arc::new(SinkMetrics::new()),
            worker: None,
            starter,
        }
    }

    fn start(&mut self) -> Result<(), ContractError> {
        // set before the worker runs so `open` has the last word
        self.metrics.health_cell().set(SinkHealth::Degraded);
        match (self.starter)(&self.metrics, self.capacity) {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                self.metrics.health_cell().set(SinkHealth::Disconnected);
                Err(e)
            }
        }
    }

    /// Get sink name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get current metrics
    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    pub fn health(&self) -> SinkHealth {
        self.metrics.health()
    }

    /// Whether the dispatcher should keep offering to this sink
    pub fn is_accepting(&self) -> bool {
        self.worker.is_some() && self.health() != SinkHealth::Disconnected
    }

    pub fn status(&self) -> SinkStatus {
        SinkStatus {
            name: self.name.clone(),
            sink_type: self.sink_type,
            health: self.health(),
            capacity: self.capacity,
            metrics: self.metrics.snapshot(),
        }
    }

    /// Offer an item without waiting
    ///
    /// A full mailbox displaces its oldest item (counted as dropped). A closed
    /// mailbox marks the sink `Disconnected`.
    pub fn offer(&self, item: SinkItem) -> Result<Offer, DispatcherError> {
        let closed = || DispatcherError::MailboxClosed {
            sink_name: self.name.clone(),
        };
        let worker = self.worker.as_ref().ok_or_else(closed)?;

        match worker.tx.offer(item) {
            Ok(offer) => {
                if offer == Offer::DisplacedOldest {
                    self.metrics.inc_dropped_count();
                    record_sink_offer(&self.name, OfferOutcome::DisplacedOldest);
                } else {
                    record_sink_offer(&self.name, OfferOutcome::Enqueued);
                }
                self.metrics.set_queue_len(worker.tx.len());
                Ok(offer)
            }
            Err(MailboxClosed(item)) => {
                record_sink_offer(&self.name, OfferOutcome::Closed);
                let previous = self.metrics.health_cell().set(SinkHealth::Disconnected);
                if previous != SinkHealth::Disconnected {
                    warn!(
                        sink = %self.name,
                        seq = item.sequence(),
                        "Sink mailbox closed, marking disconnected"
                    );
                    record_sink_health(&self.name, SinkHealth::Disconnected);
                }
                Err(closed())
            }
        }
    }

    /// Close the mailbox and let the worker drain for at most `grace`
    ///
    /// A worker still busy after `grace` is aborted and whatever was left in
    /// its mailbox is counted as discarded.
    #[instrument(name = "sink_handle_stop", skip(self), fields(sink = %self.name))]
    pub async fn stop(&mut self, grace: Duration) -> StopOutcome {
        let Some(Worker { tx, mut task }) = self.worker.take() else {
            return StopOutcome::NotRunning;
        };
        tx.close();

        let outcome = match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => StopOutcome::Drained,
            Ok(Err(e)) => {
                error!(sink = %self.name, error = ?e, "Worker task panicked");
                StopOutcome::Drained
            }
            Err(_) => {
                let discarded = tx.len();
                task.abort();
                let _ = task.await;
                self.metrics.add_discarded(discarded);
                warn!(sink = %self.name, discarded, "Sink did not drain in time, force closed");
                StopOutcome::ForceClosed { discarded }
            }
        };

        self.metrics.set_queue_len(0);
        self.metrics.health_cell().set(SinkHealth::Disconnected);
        debug!(sink = %self.name, ?outcome, "SinkHandle stopped");
        outcome
    }

    /// Replace the worker with a freshly built sink
    #[instrument(name = "sink_handle_restart", skip(self), fields(sink = %self.name))]
    pub async fn restart(&mut self) -> Result<(), DispatcherError> {
        if let Some(Worker { tx, task }) = self.worker.take() {
            tx.close();
            task.abort();
            let _ = task.await;
        }
        self.start()
            .map_err(|e| DispatcherError::sink_creation(&self.name, e.to_string()))?;
        self.metrics.inc_restart_count();
        info!(sink = %self.name, restarts = self.metrics.restart_count(), "Sink restarted");
        Ok(())
    }
}

fn start_worker<S: DataSink + Send + 'static>(
    sink: S,
    metrics: Arc<SinkMetrics>,
    capacity: usize,
) -> Worker {
    let (tx, rx) = mailbox(capacity);
    let name = sink.name().to_string();
    let task = tokio::spawn(sink_worker(sink, rx, metrics, name));
    Worker { tx, task }
}

fn set_health(name: &str, metrics: &SinkMetrics, health: SinkHealth) {
    let previous = metrics.health_cell().set(health);
    if previous != health {
        debug!(sink = %name, from = previous.as_str(), to = health.as_str(), "Sink health changed");
        record_sink_health(name, health);
    }
}

/// Worker task that consumes the mailbox and writes to the sink
#[instrument(name = "sink_worker_loop", skip(sink, rx, metrics), fields(sink = %name))]
async fn sink_worker<S: DataSink>(
    mut sink: S,
    mut rx: MailboxReceiver<SinkItem>,
    metrics: Arc<SinkMetrics>,
    name: String,
) {
    if let Err(e) = sink.open(metrics.health_cell().clone()).await {
        error!(sink = %name, error = %e, "Sink failed to open");
        metrics.inc_failure_count();
        drop(rx);
        set_health(&name, &metrics, SinkHealth::Disconnected);
        return;
    }
    debug!(sink = %name, "Sink worker started");

    let mut rate = RateMeter::with_shared(0.2, metrics.delivery_rate().clone());
    loop {
        let item = match tokio::time::timeout(IDLE_PROBE, rx.recv()).await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(_) => {
                rate.observe_idle(Instant::now());
                continue;
            }
        };
        metrics.set_queue_len(rx.len());

        match sink.write(&item).await {
            Ok(WriteOutcome::Delivered) => {
                metrics.inc_write_count();
                rate.record(Instant::now());
                record_sink_delivery(&name, true);
            }
            Ok(WriteOutcome::Discarded) => {
                metrics.add_discarded(1);
                debug!(
                    sink = %name,
                    kind = item.kind(),
                    seq = item.sequence(),
                    "Item discarded by sink"
                );
            }
            Err(e) if e.is_fatal() => {
                metrics.inc_failure_count();
                record_sink_delivery(&name, false);
                error!(
                    sink = %name,
                    kind = item.kind(),
                    seq = item.sequence(),
                    error = %e,
                    "Fatal write error, sink disconnected"
                );
                metrics.add_discarded(rx.discard_pending());
                // closing the mailbox tells the dispatcher to skip this sink
                drop(rx);
                set_health(&name, &metrics, SinkHealth::Disconnected);
                shutdown_sink(&mut sink, &name).await;
                return;
            }
            Err(e) => {
                metrics.inc_failure_count();
                record_sink_delivery(&name, false);
                warn!(
                    sink = %name,
                    kind = item.kind(),
                    seq = item.sequence(),
                    error = %e,
                    "Write failed"
                );
            }
        }
    }

    shutdown_sink(&mut sink, &name).await;
    metrics.set_queue_len(0);
    set_health(&name, &metrics, SinkHealth::Disconnected);
    debug!(sink = %name, "Sink worker stopped");
}

async fn shutdown_sink<S: DataSink>(sink: &mut S, name: &str) {
    if let Err(e) = sink.flush().await {
        error!(sink = %name, error = %e, "Flush failed on shutdown");
    }
    if let Err(e) = sink.close().await {
        error!(sink = %name, error = %e, "Close failed on shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{frame_item, Failure, RecordingSink};
    use tokio::time::sleep;

    async fn wait_for_health(handle: &SinkHandle, health: SinkHealth) {
        for _ in 0..200 {
            if handle.health() == health {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("sink never became {health:?}, is {:?}", handle.health());
    }

    #[tokio::test]
    async fn delivers_in_order_and_drains_on_stop() {
        let sink = RecordingSink::new("test");
        let log = sink.log();
        let mut handle = SinkHandle::spawn(sink, 10);

        for i in 1..=5 {
            assert!(handle.offer(frame_item(i)).is_ok());
        }

        assert_eq!(handle.stop(Duration::from_secs(1)).await, StopOutcome::Drained);
        let seqs: Vec<u64> = log.lock().unwrap().iter().map(|(_, s)| *s).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(handle.metrics().write_count(), 5);
        assert_eq!(handle.health(), SinkHealth::Disconnected);
        assert_eq!(handle.stop(Duration::from_secs(1)).await, StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn open_reports_connected() {
        let handle = SinkHandle::spawn(RecordingSink::new("ok"), 2);
        wait_for_health(&handle, SinkHealth::Connected).await;
        assert!(handle.is_accepting());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sink_drops_oldest_and_sees_newest() {
        let sink = RecordingSink::new("slow").delay(Duration::from_millis(100));
        let log = sink.log();
        let mut handle = SinkHandle::spawn(sink, 2);
        sleep(Duration::from_millis(1)).await;

        for i in 1..=10 {
            handle.offer(frame_item(i)).unwrap();
        }
        assert!(handle.metrics().dropped_count() > 0);
        assert!(handle.metrics().queue_len() <= 2);

        handle.stop(Duration::from_secs(5)).await;
        let seqs: Vec<u64> = log.lock().unwrap().iter().map(|(_, s)| *s).collect();
        assert_eq!(seqs.last(), Some(&10));
        assert!(seqs.windows(2).all(|w| w[0] < w[1]), "out of order: {seqs:?}");
        assert!(seqs.len() <= 3, "backlog grew: {seqs:?}");
    }

    #[tokio::test]
    async fn transient_failures_keep_worker_alive() {
        let sink = RecordingSink::new("failing").failure(Failure::Always);
        let handle = SinkHandle::spawn(sink, 10);

        for i in 1..=3 {
            handle.offer(frame_item(i)).unwrap();
        }
        sleep(Duration::from_millis(50)).await;

        assert_eq!(handle.metrics().failure_count(), 3);
        assert!(handle.is_accepting());
        assert!(handle.offer(frame_item(4)).is_ok());
    }

    #[tokio::test]
    async fn fatal_failure_closes_mailbox() {
        let sink = RecordingSink::new("fragile").failure(Failure::FatalAt(1));
        let handle = SinkHandle::spawn(sink, 4);

        handle.offer(frame_item(1)).unwrap();
        wait_for_health(&handle, SinkHealth::Disconnected).await;

        let err = handle.offer(frame_item(2)).unwrap_err();
        assert!(matches!(err, DispatcherError::MailboxClosed { .. }));
        assert!(!handle.is_accepting());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_sink_is_force_closed_after_grace() {
        let sink = RecordingSink::new("stalled").delay(Duration::from_secs(3600));
        let mut handle = SinkHandle::spawn(sink, 4);
        sleep(Duration::from_millis(1)).await;
        for i in 1..=3 {
            handle.offer(frame_item(i)).unwrap();
        }
        sleep(Duration::from_millis(1)).await;

        let started = Instant::now();
        let outcome = handle.stop(Duration::from_millis(500)).await;
        assert_eq!(outcome, StopOutcome::ForceClosed { discarded: 2 });
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(handle.metrics().discarded_count(), 2);
    }

    #[tokio::test]
    async fn restartable_sink_comes_back() {
        let mut builds = 0;
        let mut handle = SinkHandle::spawn_restartable(
            "phoenix",
            move || {
                builds += 1;
                let failure = if builds == 1 { Failure::FatalAt(1) } else { Failure::Never };
                Ok(RecordingSink::new("phoenix").failure(failure))
            },
            4,
        )
        .unwrap();

        handle.offer(frame_item(1)).unwrap();
        wait_for_health(&handle, SinkHealth::Disconnected).await;

        handle.restart().await.unwrap();
        wait_for_health(&handle, SinkHealth::Connected).await;
        assert!(handle.offer(frame_item(2)).is_ok());
        assert_eq!(handle.metrics().restart_count(), 1);
    }

    #[tokio::test]
    async fn one_shot_sink_cannot_restart() {
        let mut handle = SinkHandle::spawn(RecordingSink::new("once"), 2);
        let err = handle.restart().await.unwrap_err();
        assert!(matches!(err, DispatcherError::SinkCreation { .. }));
        assert_eq!(handle.health(), SinkHealth::Disconnected);
    }

    #[tokio::test]
    async fn factory_error_surfaces_as_creation_error() {
        let result = SinkHandle::spawn_restartable(
            "broken",
            || Err::<RecordingSink, _>(ContractError::Other("no device".into())),
            2,
        );
        assert!(matches!(result, Err(DispatcherError::SinkCreation { .. })));
    }
}
