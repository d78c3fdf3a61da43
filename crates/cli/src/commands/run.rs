//! `run` command implementation.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use contracts::{SinkType, StationBlueprint};
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Station, StationConfig};

/// Execute the `run` command
pub async fn run_station(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    apply_overrides(&mut blueprint, args)?;
    config_loader::ConfigLoader::validate(&blueprint)
        .context("Configuration invalid after overrides")?;

    info!(
        tick_hz = blueprint.core.tick_hz,
        capture_fps = blueprint.capture.fps,
        telemetry_hz = blueprint.telemetry.update_rate_hz,
        sinks = blueprint.sinks.len(),
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let station = Station::new(StationConfig {
        blueprint,
        max_duration: (args.max_seconds > 0).then(|| Duration::from_secs(args.max_seconds)),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
        status_interval: (args.status_interval > 0)
            .then(|| Duration::from_secs(args.status_interval)),
    });

    info!("Starting station...");
    let stats = station
        .run(shutdown_signal())
        .await
        .context("Station execution failed")?;

    info!(
        duration_secs = stats.duration.as_secs_f64(),
        ticks = stats.dispatch.ticks,
        frames = stats.dispatch.frames,
        "Station stopped"
    );
    stats.print_summary();

    Ok(())
}

/// Apply `--tick-hz` and `--transmitter`
fn apply_overrides(blueprint: &mut StationBlueprint, args: &RunArgs) -> Result<(), CliError> {
    if let Some(tick_hz) = args.tick_hz {
        if !tick_hz.is_finite() || tick_hz <= 0.0 {
            return Err(CliError::invalid_override(
                "tick-hz",
                format!("{tick_hz} is not a positive rate"),
            ));
        }
        info!(tick_hz, "Overriding tick rate from CLI");
        blueprint.core.tick_hz = tick_hz;
    }

    if let Some(target) = &args.transmitter {
        let mut params = vec![("transport", "loopback".to_string())];
        if target != "loopback" {
            let peer: SocketAddr = target.parse().map_err(|e| {
                CliError::invalid_override("transmitter", format!("'{target}': {e}"))
            })?;
            params = vec![("transport", "udp".to_string()), ("peer", peer.to_string())];
        }

        let mut overridden = 0;
        for sink in blueprint
            .sinks
            .iter_mut()
            .filter(|s| s.sink_type == SinkType::Transmitter)
        {
            sink.params.remove("peer");
            sink.params.remove("path");
            for (key, value) in &params {
                sink.params.insert(key.to_string(), value.clone());
            }
            overridden += 1;
        }
        if overridden == 0 {
            warn!(target = %target, "--transmitter given but no transmitter sink is configured");
        } else {
            info!(target = %target, sinks = overridden, "Overriding transmitter endpoint from CLI");
        }
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &StationBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Core:");
    println!("  Tick: {} Hz", blueprint.core.tick_hz);
    println!("  Mailbox capacity: {}", blueprint.core.mailbox_capacity);
    println!(
        "  Capture: {}x{} @ {} fps",
        blueprint.capture.width, blueprint.capture.height, blueprint.capture.fps
    );
    println!("  Telemetry: {} Hz", blueprint.telemetry.update_rate_hz);

    println!("\nSinks ({}):", blueprint.sinks.len());
    for sink in &blueprint.sinks {
        println!("  - {} ({})", sink.name, sink.sink_type.as_str());
    }

    println!();
}
