//! `info` command implementation.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use contracts::StationBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    core: CoreInfo,
    capture: CaptureInfo,
    telemetry_hz: f64,
    sink_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sinks: Vec<SinkInfo>,
}

#[derive(Serialize)]
struct CoreInfo {
    tick_hz: f64,
    mailbox_capacity: usize,
    heartbeat_interval_ms: u64,
    heartbeat_timeout_ms: u64,
    drain_timeout_ms: u64,
}

#[derive(Serialize)]
struct CaptureInfo {
    device_id: u32,
    width: u32,
    height: u32,
    fps: f64,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    queue_capacity: usize,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    params: BTreeMap<String, String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json = serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info(blueprint: &StationBlueprint, args: &InfoArgs) -> ConfigInfo {
    let core = &blueprint.core;
    let sinks = if args.sinks {
        blueprint
            .sinks
            .iter()
            .map(|s| SinkInfo {
                name: s.name.clone(),
                sink_type: s.sink_type.as_str().to_string(),
                queue_capacity: s.effective_capacity(core),
                params: s.params.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        core: CoreInfo {
            tick_hz: core.tick_hz,
            mailbox_capacity: core.mailbox_capacity,
            heartbeat_interval_ms: core.heartbeat_interval_ms,
            heartbeat_timeout_ms: core.heartbeat_timeout_ms,
            drain_timeout_ms: core.drain_timeout_ms,
        },
        capture: CaptureInfo {
            device_id: blueprint.capture.device_id,
            width: blueprint.capture.width,
            height: blueprint.capture.height,
            fps: blueprint.capture.fps,
        },
        telemetry_hz: blueprint.telemetry.update_rate_hz,
        sink_count: blueprint.sinks.len(),
        sinks,
    }
}

fn print_config_info(blueprint: &StationBlueprint, args: &InfoArgs) {
    let core = &blueprint.core;
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                 skyrelay Station Configuration               ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("⏱  Core");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Tick: {} Hz", core.tick_hz);
    println!("   ├─ Mailbox capacity: {}", core.mailbox_capacity);
    println!(
        "   ├─ Heartbeat: every {} ms, timeout {} ms",
        core.heartbeat_interval_ms, core.heartbeat_timeout_ms
    );
    println!(
        "   ├─ Retries: handshake {}, command {} (x{} backoff)",
        core.handshake_retries, core.command_retries, core.command_retry_backoff
    );
    println!("   └─ Drain timeout: {} ms", core.drain_timeout_ms);

    let capture = &blueprint.capture;
    println!("\n📷 Capture");
    println!("   ├─ Device: {}", capture.device_id);
    println!("   └─ {}x{} @ {} fps", capture.width, capture.height, capture.fps);

    println!("\n📡 Telemetry");
    println!("   └─ {} Hz", blueprint.telemetry.update_rate_hz);

    println!("\n📤 Sinks ({})", blueprint.sinks.len());
    for (i, sink) in blueprint.sinks.iter().enumerate() {
        let is_last = i == blueprint.sinks.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };
        println!(
            "   {} {} ({}, queue {})",
            prefix,
            sink.name,
            sink.sink_type.as_str(),
            sink.effective_capacity(core)
        );

        if args.sinks {
            let params: BTreeMap<_, _> = sink.params.iter().collect();
            for (key, value) in params {
                println!("   {}     {} = {}", child_prefix, key, value);
            }
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_loader::{ConfigFormat, ConfigLoader};

    #[test]
    fn sinks_listed_only_on_request() {
        let blueprint = ConfigLoader::load_from_str(
            r#"
[core]
mailbox_capacity = 6

[[sinks]]
name = "dash"
sink_type = "presentation"
"#,
            ConfigFormat::Toml,
        )
        .unwrap();

        let args = InfoArgs {
            config: "unused.toml".into(),
            json: true,
            sinks: false,
        };
        let info = build_config_info(&blueprint, &args);
        assert_eq!(info.sink_count, 1);
        assert!(info.sinks.is_empty());

        let args = InfoArgs { sinks: true, ..args };
        let info = build_config_info(&blueprint, &args);
        assert_eq!(info.sinks[0].sink_type, "presentation");
        assert_eq!(info.sinks[0].queue_capacity, 6);
    }
}
