//! 配置校验模块
//!
//! 校验规则：
//! - core 参数范围 (validator derive)
//! - heartbeat_timeout_ms > heartbeat_interval_ms
//! - 采集/遥测频率 > 0
//! - sink 名称非空且唯一，queue_capacity > 0
//! - transmitter / cloud 的类型特定参数可解析

use std::collections::HashSet;

use contracts::{
    ContractError, CoreSettings, RoomConfig, SinkConfig, SinkType, StationBlueprint,
    TransmitterEndpoint, VideoQuality,
};
use validator::Validate;

/// 校验 StationBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &StationBlueprint) -> Result<(), ContractError> {
    validate_core(&blueprint.core)?;
    validate_sources(blueprint)?;
    validate_sink_names(&blueprint.sinks)?;
    for sink in &blueprint.sinks {
        validate_sink_params(sink)?;
    }
    Ok(())
}

/// 校验核心参数
fn validate_core(core: &CoreSettings) -> Result<(), ContractError> {
    if let Err(errors) = core.validate() {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|key| format!("core.{key}"))
            .unwrap_or_else(|| "core".to_string());
        return Err(ContractError::config_validation(field, errors.to_string()));
    }

    if core.heartbeat_timeout_ms <= core.heartbeat_interval_ms {
        return Err(ContractError::config_validation(
            "core.heartbeat_timeout_ms",
            format!(
                "heartbeat_timeout_ms ({}) must be greater than heartbeat_interval_ms ({})",
                core.heartbeat_timeout_ms, core.heartbeat_interval_ms
            ),
        ));
    }
    Ok(())
}

/// 校验采集源与遥测源
fn validate_sources(blueprint: &StationBlueprint) -> Result<(), ContractError> {
    let capture = &blueprint.capture;
    if capture.width == 0 || capture.height == 0 {
        return Err(ContractError::config_validation(
            "capture.width / capture.height",
            format!("resolution must be non-zero, got {}x{}", capture.width, capture.height),
        ));
    }
    if capture.fps <= 0.0 {
        return Err(ContractError::config_validation(
            "capture.fps",
            format!("fps must be > 0, got {}", capture.fps),
        ));
    }
    if blueprint.telemetry.update_rate_hz <= 0.0 {
        return Err(ContractError::config_validation(
            "telemetry.update_rate_hz",
            format!("update_rate_hz must be > 0, got {}", blueprint.telemetry.update_rate_hz),
        ));
    }
    Ok(())
}

/// 校验 sink 名称与容量
fn validate_sink_names(sinks: &[SinkConfig]) -> Result<(), ContractError> {
    if sinks.is_empty() {
        return Err(ContractError::config_validation("sinks", "at least one sink is required"));
    }

    let mut seen = HashSet::new();
    for (idx, sink) in sinks.iter().enumerate() {
        if sink.name.trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks[{idx}].name"),
                "sink name cannot be empty",
            ));
        }
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
        if sink.queue_capacity == Some(0) {
            return Err(ContractError::config_validation(
                format!("sinks[{}].queue_capacity", sink.name),
                "queue_capacity must be > 0",
            ));
        }
    }
    Ok(())
}

/// 校验类型特定参数，字段名加上 sink 前缀
fn validate_sink_params(sink: &SinkConfig) -> Result<(), ContractError> {
    let result = match sink.sink_type {
        SinkType::Transmitter => TransmitterEndpoint::from_params(&sink.params).and_then(|_| {
            sink.params
                .get("quality")
                .map(|q| q.parse::<VideoQuality>().map(|_| ()))
                .unwrap_or(Ok(()))
        }),
        SinkType::Cloud => RoomConfig::from_params(&sink.params).map(|_| ()),
        SinkType::Log | SinkType::Presentation => Ok(()),
    };

    result.map_err(|e| match e {
        ContractError::ConfigValidation { field, message } => {
            ContractError::config_validation(format!("sinks[{}].{field}", sink.name), message)
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CaptureConfig, ConfigVersion, TelemetryConfig};
    use std::collections::HashMap;

    fn sink(name: &str, sink_type: SinkType, params: &[(&str, &str)]) -> SinkConfig {
        SinkConfig {
            name: name.into(),
            sink_type,
            queue_capacity: None,
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn minimal_blueprint() -> StationBlueprint {
        StationBlueprint {
            version: ConfigVersion::V1,
            core: CoreSettings::default(),
            capture: CaptureConfig::default(),
            telemetry: TelemetryConfig::default(),
            sinks: vec![
                sink("diag", SinkType::Log, &[]),
                sink("uplink", SinkType::Transmitter, &[("peer", "10.0.0.2:5600")]),
                sink(
                    "room",
                    SinkType::Cloud,
                    &[("url", "wss://rtc.example.net"), ("room", "drone-1")],
                ),
            ],
        }
    }

    fn error_of(bp: &StationBlueprint) -> String {
        validate(bp).unwrap_err().to_string()
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&minimal_blueprint()).is_ok());
    }

    #[test]
    fn test_heartbeat_timeout_must_exceed_interval() {
        let mut bp = minimal_blueprint();
        bp.core.heartbeat_timeout_ms = bp.core.heartbeat_interval_ms;
        let err = error_of(&bp);
        assert!(err.contains("core.heartbeat_timeout_ms"), "got: {err}");
    }

    #[test]
    fn test_core_range_checked() {
        let mut bp = minimal_blueprint();
        bp.core.mailbox_capacity = 0;
        let err = error_of(&bp);
        assert!(err.contains("core.mailbox_capacity"), "got: {err}");
    }

    #[test]
    fn test_invalid_capture_fps() {
        let mut bp = minimal_blueprint();
        bp.capture.fps = 0.0;
        let err = error_of(&bp);
        assert!(err.contains("fps must be > 0"), "got: {err}");
    }

    #[test]
    fn test_duplicate_sink_name() {
        let mut bp = minimal_blueprint();
        bp.sinks.push(sink("diag", SinkType::Presentation, &[]));
        let err = error_of(&bp);
        assert!(err.contains("duplicate sink name"), "got: {err}");
    }

    #[test]
    fn test_empty_sink_name() {
        let mut bp = minimal_blueprint();
        bp.sinks[0].name = "  ".into();
        let err = error_of(&bp);
        assert!(err.contains("cannot be empty"), "got: {err}");
    }

    #[test]
    fn test_no_sinks() {
        let mut bp = minimal_blueprint();
        bp.sinks.clear();
        let err = error_of(&bp);
        assert!(err.contains("at least one sink"), "got: {err}");
    }

    #[test]
    fn test_zero_queue_capacity() {
        let mut bp = minimal_blueprint();
        bp.sinks[0].queue_capacity = Some(0);
        let err = error_of(&bp);
        assert!(err.contains("sinks[diag].queue_capacity"), "got: {err}");
    }

    #[test]
    fn test_transmitter_params_are_parsed() {
        let mut bp = minimal_blueprint();
        bp.sinks[1].params.insert("peer".into(), "not-an-address".into());
        let err = error_of(&bp);
        assert!(err.contains("sinks[uplink].params.peer"), "got: {err}");

        let mut bp = minimal_blueprint();
        bp.sinks[1].params.insert("quality".into(), "ultra".into());
        let err = error_of(&bp);
        assert!(err.contains("sinks[uplink].params.quality"), "got: {err}");
    }

    #[test]
    fn test_cloud_params_required() {
        let mut bp = minimal_blueprint();
        bp.sinks[2].params.remove("room");
        let err = error_of(&bp);
        assert!(err.contains("sinks[room].params.room"), "got: {err}");
    }
}
