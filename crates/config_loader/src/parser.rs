//! 配置解析模块
//!
//! 支持 TOML (主要) 和 JSON (可选) 格式。

use contracts::{ContractError, StationBlueprint};

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML 格式 (推荐)
    Toml,
    /// JSON 格式
    Json,
}

impl ConfigFormat {
    /// 从文件扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// 解析 TOML 格式配置
pub fn parse_toml(content: &str) -> Result<StationBlueprint, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 解析 JSON 格式配置
pub fn parse_json(content: &str) -> Result<StationBlueprint, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 根据格式解析配置
pub fn parse(content: &str, format: ConfigFormat) -> Result<StationBlueprint, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::SinkType;

    #[test]
    fn test_parse_toml_defaults_fill_in() {
        let content = r#"
[[sinks]]
name = "diag"
sink_type = "log"
"#;
        let bp = parse_toml(content).unwrap();
        assert_eq!(bp.core.tick_hz, 30.0);
        assert_eq!(bp.core.mailbox_capacity, 4);
        assert_eq!(bp.capture.fps, 30.0);
        assert_eq!(bp.telemetry.update_rate_hz, 10.0);
        assert_eq!(bp.sinks[0].sink_type, SinkType::Log);
        assert!(bp.sinks[0].queue_capacity.is_none());
    }

    #[test]
    fn test_parse_toml_with_params() {
        let content = r#"
[core]
tick_hz = 25.0
heartbeat_interval_ms = 500
heartbeat_timeout_ms = 1500

[capture]
device_id = 1
width = 1280
height = 720
fps = 25.0

[[sinks]]
name = "uplink"
sink_type = "transmitter"
queue_capacity = 2
[sinks.params]
transport = "udp"
peer = "192.168.1.20:5600"
quality = "medium"
"#;
        let bp = parse_toml(content).unwrap();
        assert_eq!(bp.core.tick_hz, 25.0);
        assert_eq!(bp.core.heartbeat_timeout_ms, 1500);
        // untouched fields keep their defaults
        assert_eq!(bp.core.command_retries, 3);
        assert_eq!(bp.capture.width, 1280);
        let sink = &bp.sinks[0];
        assert_eq!(sink.queue_capacity, Some(2));
        assert_eq!(sink.params.get("peer").map(String::as_str), Some("192.168.1.20:5600"));
    }

    #[test]
    fn test_parse_json() {
        let content = r#"{
            "telemetry": { "update_rate_hz": 5.0 },
            "sinks": [
                {
                    "name": "room",
                    "sink_type": "cloud",
                    "params": { "url": "wss://x", "room": "r" }
                }
            ]
        }"#;
        let bp = parse_json(content).unwrap();
        assert_eq!(bp.telemetry.update_rate_hz, 5.0);
        assert_eq!(bp.sinks[0].sink_type, SinkType::Cloud);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = parse_toml("this is not valid toml [[[");
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ContractError::ConfigParse { .. }));
    }

    #[test]
    fn test_unknown_sink_type_rejected() {
        let content = r#"
[[sinks]]
name = "x"
sink_type = "file"
"#;
        assert!(parse_toml(content).is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_extension("toml"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("TOML"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("json"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
