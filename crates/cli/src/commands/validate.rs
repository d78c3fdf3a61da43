//! `validate` command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use contracts::{SinkType, StationBlueprint};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Outcome of validating one file; serialized for `--json`
#[derive(Serialize)]
struct ValidationReport {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    tick_hz: f64,
    capture_fps: f64,
    telemetry_hz: f64,
    sink_count: usize,
}

impl ValidationReport {
    fn rejected(path: &Path, error: String) -> Self {
        Self {
            valid: false,
            config_path: path.display().to_string(),
            error: Some(error),
            warnings: Vec::new(),
            summary: None,
        }
    }

    fn accepted(path: &Path, blueprint: &StationBlueprint) -> Self {
        Self {
            valid: true,
            config_path: path.display().to_string(),
            error: None,
            warnings: collect_warnings(blueprint),
            summary: Some(ConfigSummary {
                version: format!("{:?}", blueprint.version),
                tick_hz: blueprint.core.tick_hz,
                capture_fps: blueprint.capture.fps,
                telemetry_hz: blueprint.telemetry.update_rate_hz,
                sink_count: blueprint.sinks.len(),
            }),
        }
    }
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let report = validate_config(&args.config);
    if args.json {
        let json = serde_json::to_string_pretty(&report)
            .context("Failed to serialize validation report")?;
        println!("{json}");
    } else {
        print_report(&report);
    }

    if !report.valid {
        anyhow::bail!("Configuration validation failed");
    }
    Ok(())
}

fn validate_config(path: &Path) -> ValidationReport {
    if !path.exists() {
        return ValidationReport::rejected(path, format!("File not found: {}", path.display()));
    }
    match config_loader::ConfigLoader::load_from_path(path) {
        Ok(blueprint) => ValidationReport::accepted(path, &blueprint),
        Err(e) => ValidationReport::rejected(path, e.to_string()),
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &StationBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.core.tick_hz < blueprint.capture.fps {
        warnings.push(format!(
            "core.tick_hz ({}) is below capture.fps ({}) - some frames will never be dispatched",
            blueprint.core.tick_hz, blueprint.capture.fps
        ));
    }
    if blueprint.telemetry.update_rate_hz > blueprint.core.tick_hz {
        warnings.push(format!(
            "telemetry.update_rate_hz ({}) exceeds core.tick_hz ({}) - snapshots will be coalesced",
            blueprint.telemetry.update_rate_hz, blueprint.core.tick_hz
        ));
    }

    for sink in &blueprint.sinks {
        if sink.sink_type == SinkType::Transmitter
            && sink.params.get("transport").map(String::as_str) == Some("loopback")
        {
            warnings.push(format!(
                "Sink '{}' uses the in-process loopback transmitter - no radio traffic",
                sink.name
            ));
        }
    }

    if !blueprint.sinks.iter().any(|s| s.sink_type == SinkType::Presentation) {
        warnings.push(
            "No presentation sink configured - the local dashboard gets no data".to_string(),
        );
    }

    warnings
}

fn print_report(report: &ValidationReport) {
    if !report.valid {
        println!("✗ Configuration is invalid: {}", report.config_path);
        if let Some(error) = &report.error {
            println!("\n  Error: {error}");
        }
        return;
    }

    println!("✓ Configuration is valid: {}", report.config_path);
    if let Some(summary) = &report.summary {
        println!(
            "\n  Version {} | tick {} Hz | capture {} fps | telemetry {} Hz | {} sinks",
            summary.version,
            summary.tick_hz,
            summary.capture_fps,
            summary.telemetry_hz,
            summary.sink_count
        );
    }
    if !report.warnings.is_empty() {
        println!("\n⚠ Warnings:");
        for warning in &report.warnings {
            println!("  - {warning}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn valid_config_reports_warnings() {
        let file = write_config(
            r#"
[core]
tick_hz = 15.0

[[sinks]]
name = "uplink"
sink_type = "transmitter"
[sinks.params]
transport = "loopback"
"#,
        );
        let report = validate_config(file.path());
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 3, "{:?}", report.warnings);
        assert_eq!(report.summary.unwrap().sink_count, 1);
    }

    #[test]
    fn invalid_config_carries_error() {
        let file = write_config(
            r#"
[[sinks]]
name = "room"
sink_type = "cloud"
"#,
        );
        let report = validate_config(file.path());
        assert!(!report.valid);
        assert!(report.error.unwrap().contains("params.url"));
    }

    #[test]
    fn missing_file_is_invalid() {
        let report = validate_config(Path::new("/definitely/not/here.toml"));
        assert!(!report.valid);
        assert!(report.error.unwrap().starts_with("File not found"));
    }
}
