//! Dispatcher - fixed-cadence fan-out of the newest frame and telemetry to sinks

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant as StdInstant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use contracts::{
    CloudSession, CoreSettings, RoomConfig, SinkConfig, SinkItem, SinkType, TelemetrySnapshot,
};
use ingestion::{FrameFeed, TelemetryFeed};
use observability::metrics::{
    record_sink_health, record_source_rate, record_tick, RunningStats, StatsSummary,
};

use crate::error::DispatcherError;
use crate::handle::{SinkHandle, StopOutcome};
use crate::metrics::SinkStatus;
use crate::sinks::{
    CloudSink, LogSink, PresentationHub, PresentationSink, TracingCloudSession, TransmitterSink,
};

/// Pending control requests before callers wait
const CONTROL_QUEUE: usize = 16;

enum ControlRequest {
    Status(oneshot::Sender<Vec<SinkStatus>>),
    Restart {
        name: String,
        reply: oneshot::Sender<Result<(), DispatcherError>>,
    },
}

/// Cloneable handle for querying and steering a running dispatcher
///
/// Requests are served between ticks.
#[derive(Clone)]
pub struct DispatcherControl {
    tx: mpsc::Sender<ControlRequest>,
}

impl DispatcherControl {
    /// Per-sink health and counters
    pub async fn status(&self) -> Result<Vec<SinkStatus>, DispatcherError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControlRequest::Status(reply))
            .await
            .map_err(|_| DispatcherError::Stopped)?;
        rx.await.map_err(|_| DispatcherError::Stopped)
    }

    /// Rebuild a sink (typically one marked `Disconnected`)
    pub async fn restart(&self, name: impl Into<String>) -> Result<(), DispatcherError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControlRequest::Restart {
                name: name.into(),
                reply,
            })
            .await
            .map_err(|_| DispatcherError::Stopped)?;
        rx.await.map_err(|_| DispatcherError::Stopped)?
    }
}

/// Totals returned once the dispatcher has shut down
#[derive(Debug, Clone)]
pub struct DispatchStats {
    pub ticks: u64,
    /// Ticks that found a new frame
    pub frames: u64,
    /// Ticks that found a new telemetry snapshot
    pub snapshots: u64,
    /// Items accepted by sink mailboxes
    pub offered: u64,
    pub tick_latency_ms: StatsSummary,
    pub sinks: Vec<SinkStatus>,
}

#[derive(Debug, Default)]
struct TickCounters {
    ticks: u64,
    frames: u64,
    snapshots: u64,
    offered: u64,
    latency: RunningStats,
}

/// 主分发循环
///
/// 每个 tick 只读取两个数据源的最新值，按序号判断是否为新数据，
/// 然后以非阻塞、丢弃最旧的方式投递给每个健康的 sink。
pub struct Dispatcher {
    settings: CoreSettings,
    frames: FrameFeed,
    telemetry: TelemetryFeed,
    sinks: Vec<SinkHandle>,
    last_frame: Option<u64>,
    last_snapshot: Option<u64>,
    control_tx: mpsc::Sender<ControlRequest>,
    control_rx: mpsc::Receiver<ControlRequest>,
    counters: TickCounters,
}

impl Dispatcher {
    /// Create a dispatcher over already-running sink handles
    pub fn new(
        settings: CoreSettings,
        frames: FrameFeed,
        telemetry: TelemetryFeed,
        sinks: Vec<SinkHandle>,
    ) -> Result<Self, DispatcherError> {
        let mut names = HashSet::new();
        for sink in &sinks {
            if !names.insert(sink.name().to_string()) {
                return Err(DispatcherError::DuplicateSink {
                    name: sink.name().to_string(),
                });
            }
        }

        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);
        Ok(Self {
            settings,
            frames,
            telemetry,
            sinks,
            last_frame: None,
            last_snapshot: None,
            control_tx,
            control_rx,
            counters: TickCounters::default(),
        })
    }

    pub fn control(&self) -> DispatcherControl {
        DispatcherControl {
            tx: self.control_tx.clone(),
        }
    }

    pub fn sinks(&self) -> &[SinkHandle] {
        &self.sinks
    }

    pub fn statuses(&self) -> Vec<SinkStatus> {
        self.sinks.iter().map(SinkHandle::status).collect()
    }

    /// One dispatch step; returns the number of items accepted by mailboxes
    pub fn tick(&mut self) -> usize {
        let started = StdInstant::now();
        self.counters.ticks += 1;

        let frame = self
            .frames
            .latest()
            .filter(|frame| self.last_frame.is_none_or(|last| frame.sequence > last));
        let snapshot = self
            .telemetry
            .latest()
            .filter(|snapshot| self.last_snapshot.is_none_or(|last| snapshot.sequence > last));

        let mut items = Vec::with_capacity(2);
        if let Some(frame) = frame {
            self.last_frame = Some(frame.sequence);
            self.counters.frames += 1;
            items.push(SinkItem::Frame(frame.as_ref().clone()));
        }
        if let Some(snapshot) = snapshot {
            self.last_snapshot = Some(snapshot.sequence);
            self.counters.snapshots += 1;
            let mut merged = snapshot.as_ref().clone();
            self.merge_derived(&mut merged);
            items.push(SinkItem::Telemetry(Arc::new(merged)));
        }

        let mut offered = 0;
        if !items.is_empty() {
            for sink in self.sinks.iter().filter(|sink| sink.is_accepting()) {
                for item in &items {
                    match sink.offer(item.clone()) {
                        Ok(_) => offered += 1,
                        // the handle has marked it Disconnected; skipped from now on
                        Err(_) => break,
                    }
                }
            }
        }
        self.counters.offered += offered as u64;

        for sink in &self.sinks {
            record_sink_health(sink.name(), sink.health());
        }
        record_source_rate("capture", self.frames.rate());
        record_source_rate("telemetry", self.telemetry.rate());

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.counters.latency.push(latency_ms);
        record_tick(latency_ms, offered);
        offered
    }

    /// Rates and per-sink health/counters, keyed for the dashboard
    fn merge_derived(&self, snapshot: &mut TelemetrySnapshot) {
        snapshot.merge([
            ("capture.fps".to_string(), self.frames.rate()),
            ("telemetry.rate_hz".to_string(), self.telemetry.rate()),
        ]);
        for sink in &self.sinks {
            let metrics = sink.metrics();
            let prefix = format!("sink.{}", sink.name());
            snapshot.merge([
                (format!("{prefix}.health"), f64::from(sink.health().code())),
                (format!("{prefix}.dropped"), metrics.dropped_count() as f64),
                (format!("{prefix}.delivered"), metrics.write_count() as f64),
                (format!("{prefix}.discarded"), metrics.discarded_count() as f64),
                (format!("{prefix}.delivery_rate"), metrics.delivery_rate().get()),
            ]);
        }
    }

    async fn serve(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Status(reply) => {
                let _ = reply.send(self.statuses());
            }
            ControlRequest::Restart { name, reply } => {
                let result = match self.sinks.iter_mut().find(|sink| sink.name() == name) {
                    Some(sink) => sink.restart().await,
                    None => Err(DispatcherError::UnknownSink { name }),
                };
                let _ = reply.send(result);
            }
        }
    }

    /// Tick until `cancel` fires, then stop every sink
    #[instrument(
        name = "dispatcher_run",
        skip_all,
        fields(sinks = self.sinks.len(), tick_hz = self.settings.tick_hz)
    )]
    pub async fn run(mut self, cancel: CancellationToken) -> DispatchStats {
        info!(sinks = self.sinks.len(), "Dispatcher started");

        let mut ticker = tokio::time::interval(self.settings.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(request) = self.control_rx.recv() => self.serve(request).await,
                _ = ticker.tick() => {
                    self.tick();
                    if self.counters.ticks.is_multiple_of(300) {
                        debug!(
                            ticks = self.counters.ticks,
                            frames = self.counters.frames,
                            snapshots = self.counters.snapshots,
                            "Dispatcher progress"
                        );
                    }
                }
            }
        }

        info!(ticks = self.counters.ticks, "Dispatcher cancelled, stopping sinks");
        self.shutdown().await
    }

    /// Spawn [`Dispatcher::run`] as a background task
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<DispatchStats> {
        tokio::spawn(self.run(cancel))
    }

    async fn shutdown(mut self) -> DispatchStats {
        let grace = self.settings.drain_timeout();
        // sequential: each sink gets the full grace period
        for sink in &mut self.sinks {
            if let StopOutcome::ForceClosed { discarded } = sink.stop(grace).await {
                warn!(sink = %sink.name(), discarded, "Sink force closed on shutdown");
            }
        }

        let stats = DispatchStats {
            ticks: self.counters.ticks,
            frames: self.counters.frames,
            snapshots: self.counters.snapshots,
            offered: self.counters.offered,
            tick_latency_ms: self.counters.latency.summary(),
            sinks: self.statuses(),
        };
        info!(
            ticks = stats.ticks,
            frames = stats.frames,
            snapshots = stats.snapshots,
            tick_latency_ms = %stats.tick_latency_ms,
            "Dispatcher shutdown complete"
        );
        stats
    }
}

type CloudSpawner =
    Arc<dyn Fn(&SinkConfig, usize) -> Result<SinkHandle, DispatcherError> + Send + Sync>;

/// Builder creating sink handles from configuration
pub struct DispatcherBuilder {
    settings: CoreSettings,
    frames: FrameFeed,
    telemetry: TelemetryFeed,
    configs: Vec<SinkConfig>,
    extra: Vec<SinkHandle>,
    hub: PresentationHub,
    cloud: CloudSpawner,
    cancel: CancellationToken,
}

impl DispatcherBuilder {
    pub fn new(settings: CoreSettings, frames: FrameFeed, telemetry: TelemetryFeed) -> Self {
        Self {
            settings,
            frames,
            telemetry,
            configs: Vec::new(),
            extra: Vec::new(),
            hub: PresentationHub::default(),
            cloud: cloud_spawner(TracingCloudSession::new),
            cancel: CancellationToken::new(),
        }
    }

    /// Sinks to create from configuration
    pub fn sinks(mut self, configs: impl IntoIterator<Item = SinkConfig>) -> Self {
        self.configs.extend(configs);
        self
    }

    /// Add a pre-built handle next to the configured sinks
    pub fn sink(mut self, handle: SinkHandle) -> Self {
        self.extra.push(handle);
        self
    }

    /// Hub that presentation sinks push into
    pub fn presenter(mut self, hub: PresentationHub) -> Self {
        self.hub = hub;
        self
    }

    /// Session factory for cloud sinks; one session per (re)start
    pub fn cloud_sessions<C, F>(mut self, factory: F) -> Self
    where
        C: CloudSession + Send + 'static,
        F: Fn() -> C + Send + Sync + 'static,
    {
        self.cloud = cloud_spawner(factory);
        self
    }

    /// Token that also stops transmitter link engines
    pub fn cancel(mut self, cancel: &CancellationToken) -> Self {
        self.cancel = cancel.clone();
        self
    }

    #[instrument(
        name = "dispatcher_builder_build",
        skip_all,
        fields(sink_count = self.configs.len() + self.extra.len())
    )]
    pub async fn build(self) -> Result<Dispatcher, DispatcherError> {
        let mut seen = HashSet::new();
        for config in &self.configs {
            if !seen.insert(config.name.as_str()) {
                return Err(DispatcherError::DuplicateSink {
                    name: config.name.clone(),
                });
            }
        }

        let mut handles = Vec::with_capacity(self.configs.len() + self.extra.len());
        for config in &self.configs {
            handles.push(self.create_sink_handle(config)?);
        }
        handles.extend(self.extra);

        Dispatcher::new(self.settings, self.frames, self.telemetry, handles)
    }

    #[instrument(
        name = "dispatcher_create_sink_handle",
        skip(self, config),
        fields(sink = %config.name, sink_type = config.sink_type.as_str())
    )]
    fn create_sink_handle(&self, config: &SinkConfig) -> Result<SinkHandle, DispatcherError> {
        let capacity = config.effective_capacity(&self.settings);
        let name = config.name.clone();

        let handle = match config.sink_type {
            SinkType::Log => {
                let sink_name = name.clone();
                SinkHandle::spawn_restartable(
                    name,
                    move || Ok(LogSink::new(sink_name.clone())),
                    capacity,
                )?
            }
            SinkType::Transmitter => {
                let sink_name = name.clone();
                let params = config.params.clone();
                let settings = self.settings.clone();
                let cancel = self.cancel.clone();
                SinkHandle::spawn_restartable(
                    name,
                    move || {
                        Ok(TransmitterSink::from_params(sink_name.clone(), &params, &settings)?
                            .cancel_on(&cancel))
                    },
                    capacity,
                )?
            }
            SinkType::Cloud => (self.cloud)(config, capacity)?,
            SinkType::Presentation => {
                let sink_name = name.clone();
                let hub = self.hub.clone();
                SinkHandle::spawn_restartable(
                    name,
                    move || Ok(PresentationSink::new(sink_name.clone(), hub.clone())),
                    capacity,
                )?
            }
        };
        debug!(sink = %config.name, capacity, "Sink handle created");
        Ok(handle.with_type(config.sink_type))
    }
}

fn cloud_spawner<C, F>(factory: F) -> CloudSpawner
where
    C: CloudSession + Send + 'static,
    F: Fn() -> C + Send + Sync + 'static,
{
    let factory = Arc::new(factory);
    Arc::new(move |config: &SinkConfig, capacity: usize| {
        let room = RoomConfig::from_params(&config.params)
            .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?;
        let sink_name = config.name.clone();
        let factory = Arc::clone(&factory);
        SinkHandle::spawn_restartable(
            config.name.clone(),
            move || Ok(CloudSink::new(sink_name.clone(), room.clone(), factory())),
            capacity,
        )
    })
}
