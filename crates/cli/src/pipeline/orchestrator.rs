//! Station orchestrator - wires sources, dispatcher and sinks together.
//!
//! The capture hardware and the system metric reader are external; the CLI
//! drives the dispatcher with the mock backends from `ingestion`.

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::StationBlueprint;
use dispatcher::{DispatcherBuilder, DispatcherControl, PresentationHub};
use ingestion::{
    FrameSource, MockCaptureBackend, MockCaptureConfig, MockMetricSampler, TelemetrySource,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::StationStats;
use crate::error::CliError;

/// Capture polls per nominal frame period
const CAPTURE_OVERSAMPLE: f64 = 2.0;

/// Station configuration
#[derive(Debug, Clone)]
pub struct StationConfig {
    /// The station blueprint configuration
    pub blueprint: StationBlueprint,

    /// Stop after this long (None = until the shutdown signal)
    pub max_duration: Option<Duration>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    /// Period of the sink status log (None = never)
    pub status_interval: Option<Duration>,
}

/// Main station orchestrator
pub struct Station {
    config: StationConfig,
}

impl Station {
    pub fn new(config: StationConfig) -> Self {
        Self { config }
    }

    /// Run until `shutdown` resolves or the time limit passes
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<StationStats> {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        // sources outlive the dispatcher so the last tick still sees data;
        // links outlive it so transmitter sinks can close cleanly
        let sources = CancellationToken::new();
        let links = CancellationToken::new();
        let dispatch = CancellationToken::new();

        info!(
            device = blueprint.capture.device_id,
            width = blueprint.capture.width,
            height = blueprint.capture.height,
            fps = blueprint.capture.fps,
            "Starting capture source (mock backend)"
        );
        let capture = MockCaptureBackend::new(MockCaptureConfig {
            width: blueprint.capture.width,
            height: blueprint.capture.height,
            fps: blueprint.capture.fps,
            ..Default::default()
        });
        let frames = FrameSource::spawn(
            capture,
            blueprint.capture.fps * CAPTURE_OVERSAMPLE,
            sources.clone(),
        );
        let telemetry = TelemetrySource::spawn(
            MockMetricSampler::new(),
            blueprint.telemetry.update_rate_hz,
            sources.clone(),
        );

        let hub = PresentationHub::default();
        let dispatcher =
            DispatcherBuilder::new(blueprint.core.clone(), frames.feed(), telemetry.feed())
                .sinks(blueprint.sinks.clone())
                .presenter(hub.clone())
                .cancel(&links)
                .build()
                .await
                .context("Failed to create dispatcher")?;

        let control = dispatcher.control();
        let dispatcher_handle = dispatcher.spawn(dispatch.clone());
        info!(sinks = blueprint.sinks.len(), "Dispatcher started");

        self.wait(shutdown, &control).await;

        info!("Shutting down station...");
        dispatch.cancel();
        let dispatch_stats = dispatcher_handle
            .await
            .map_err(|e| CliError::shutdown(format!("dispatcher task failed: {e}")))?;

        links.cancel();
        sources.cancel();
        let capture_stats = frames.stats();
        let telemetry_stats = telemetry.stats();
        if let Err(e) = frames.join().await {
            warn!(error = %e, "Capture source did not stop cleanly");
        }
        if let Err(e) = telemetry.join().await {
            warn!(error = %e, "Telemetry source did not stop cleanly");
        }

        let stats = StationStats {
            duration: start_time.elapsed(),
            capture: capture_stats,
            telemetry: telemetry_stats,
            dashboard_viewers: hub.viewers(),
            dispatch: dispatch_stats,
        };

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            fps = format!("{:.2}", stats.dispatch_fps()),
            "Station shutdown complete"
        );

        Ok(stats)
    }

    /// Block until shutdown or time limit, logging sink status periodically
    async fn wait(&self, shutdown: impl Future<Output = ()>, control: &DispatcherControl) {
        let limit = async {
            match self.config.max_duration {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        let period = self.config.status_interval.unwrap_or(Duration::from_secs(3600));
        let mut status = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        tokio::pin!(shutdown, limit);
        loop {
            tokio::select! {
                _ = &mut shutdown => return,
                _ = &mut limit => {
                    info!("Reached time limit");
                    return;
                }
                _ = status.tick(), if self.config.status_interval.is_some() => {
                    log_status(control).await;
                }
            }
        }
    }
}

async fn log_status(control: &DispatcherControl) {
    match control.status().await {
        Ok(statuses) => {
            for status in statuses {
                info!(
                    sink = %status.name,
                    health = status.health.as_str(),
                    delivered = status.metrics.write_count,
                    dropped = status.metrics.dropped_count,
                    failures = status.metrics.failure_count,
                    delivery_rate = format!("{:.1}", status.metrics.delivery_rate),
                    "Sink status"
                );
            }
        }
        Err(e) => warn!(error = %e, "Sink status unavailable"),
    }
}
