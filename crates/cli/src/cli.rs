//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// skyrelay - fan-out of drone video and telemetry to ground station, cloud and dashboard
#[derive(Parser, Debug)]
#[command(
    name = "skyrelay",
    author,
    version,
    about = "Drone video/telemetry relay",
    long_about = "Relays the newest camera frame and telemetry snapshot to every \
                  configured sink.\n\n\
                  Drives the ground-station transmitter link protocol, publishes into a cloud \n\
                  room and feeds the local dashboard, isolating slow consumers from each other."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "SKYRELAY_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", global = true, env = "SKYRELAY_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay until Ctrl-C, SIGTERM or the time limit
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "station.toml", env = "SKYRELAY_CONFIG")]
    pub config: PathBuf,

    /// Stop after this many seconds (0 = run until interrupted)
    #[arg(long, default_value = "0", env = "SKYRELAY_MAX_SECONDS")]
    pub max_seconds: u64,

    /// Override the dispatcher tick rate (Hz)
    #[arg(long, env = "SKYRELAY_TICK_HZ")]
    pub tick_hz: Option<f64>,

    /// Point every transmitter sink at `host:port` (UDP) or `loopback`
    #[arg(long, env = "SKYRELAY_TRANSMITTER")]
    pub transmitter: Option<String>,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Prometheus exporter port (0 = disabled)
    #[arg(long, default_value = "0", env = "SKYRELAY_METRICS_PORT")]
    pub metrics_port: u16,

    /// Seconds between sink status log lines (0 = never)
    #[arg(long, default_value = "10", env = "SKYRELAY_STATUS_INTERVAL")]
    pub status_interval: u64,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "station.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "station.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show sink configuration
    #[arg(long)]
    pub sinks: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}
