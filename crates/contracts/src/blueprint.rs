//! StationBlueprint - Config Loader 输出
//!
//! 描述完整的站点配置：核心节拍/超时参数、采集源、遥测源、输出路由。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的站点配置蓝图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationBlueprint {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// 核心参数 (节拍、邮箱容量、心跳、重试)
    #[serde(default)]
    pub core: CoreSettings,

    /// 采集源设置
    #[serde(default)]
    pub capture: CaptureConfig,

    /// 遥测源设置
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// 输出路由配置
    pub sinks: Vec<SinkConfig>,
}

/// 核心参数
///
/// 以普通结构体注入，字段名与部署文档一致。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CoreSettings {
    /// Dispatcher 节拍频率 (Hz)，默认与采集帧率一致
    #[validate(range(min = 0.1, max = 1000.0))]
    pub tick_hz: f64,

    /// 每个 sink 的邮箱容量
    #[validate(range(min = 1, max = 4096))]
    pub mailbox_capacity: usize,

    /// 心跳间隔 (毫秒)
    #[validate(range(min = 10))]
    pub heartbeat_interval_ms: u64,

    /// 心跳超时 (毫秒)，默认 3 × 心跳间隔
    #[validate(range(min = 10))]
    pub heartbeat_timeout_ms: u64,

    /// 握手重试次数
    #[validate(range(max = 32))]
    pub handshake_retries: u32,

    /// 命令重试次数
    #[validate(range(max = 32))]
    pub command_retries: u32,

    /// 每次重试的超时倍率
    #[validate(range(min = 1.0, max = 10.0))]
    pub command_retry_backoff: f64,

    /// 单次握手等待时间 (毫秒)
    #[validate(range(min = 10))]
    pub handshake_timeout_ms: u64,

    /// 单次命令等待时间 (毫秒)
    #[validate(range(min = 10))]
    pub command_timeout_ms: u64,

    /// 最长恢复窗口 (毫秒)
    #[validate(range(min = 100))]
    pub recovery_window_ms: u64,

    /// 视频分片的最大传输单元 (字节)
    #[validate(range(min = 64, max = 65000))]
    pub fragment_mtu: usize,

    /// 停止时每个 sink 的排空时限 (毫秒)
    pub drain_timeout_ms: u64,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            tick_hz: 30.0,
            mailbox_capacity: 4,
            heartbeat_interval_ms: 1000,
            heartbeat_timeout_ms: 3000,
            handshake_retries: 3,
            command_retries: 3,
            command_retry_backoff: 1.5,
            handshake_timeout_ms: 2000,
            command_timeout_ms: 2000,
            recovery_window_ms: 30_000,
            fragment_mtu: 1400,
            drain_timeout_ms: 500,
        }
    }
}

impl CoreSettings {
    /// Dispatcher 节拍周期
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn recovery_window(&self) -> Duration {
        Duration::from_millis(self.recovery_window_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// 采集源设置 (硬件后端本身在外部)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// 设备编号
    pub device_id: u32,
    /// 宽度 (像素)
    pub width: u32,
    /// 高度 (像素)
    pub height: u32,
    /// 帧率
    pub fps: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            width: 1920,
            height: 1080,
            fps: 30.0,
        }
    }
}

/// 遥测源设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// 采样频率 (Hz)
    pub update_rate_hz: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            update_rate_hz: 10.0,
        }
    }
}

/// Sink 输出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Sink 名称
    pub name: String,

    /// Sink 类型
    pub sink_type: SinkType,

    /// 队列容量 (未设置时使用 core.mailbox_capacity)
    #[serde(default)]
    pub queue_capacity: Option<usize>,

    /// 类型特定参数
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl SinkConfig {
    /// 实际生效的邮箱容量
    pub fn effective_capacity(&self, core: &CoreSettings) -> usize {
        self.queue_capacity.unwrap_or(core.mailbox_capacity).max(1)
    }
}

/// Sink 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// 日志输出
    Log,
    /// 地面站图传发射机
    Transmitter,
    /// 云端 WebRTC 房间
    Cloud,
    /// 本地浏览器仪表盘
    Presentation,
}

impl SinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Transmitter => "transmitter",
            Self::Cloud => "cloud",
            Self::Presentation => "presentation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_settings_defaults() {
        let core = CoreSettings::default();
        assert_eq!(core.tick_hz, 30.0);
        assert_eq!(core.heartbeat_timeout_ms, 3 * core.heartbeat_interval_ms);
        assert_eq!(core.handshake_retries, 3);
        assert_eq!(core.command_retry_backoff, 1.5);
        assert!(core.validate().is_ok());
    }

    #[test]
    fn core_settings_range_checks() {
        let core = CoreSettings {
            mailbox_capacity: 0,
            command_retry_backoff: 0.5,
            ..Default::default()
        };
        let errors = core.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("mailbox_capacity"));
        assert!(fields.contains_key("command_retry_backoff"));
    }

    #[test]
    fn effective_capacity_falls_back_to_core() {
        let core = CoreSettings::default();
        let sink = SinkConfig {
            name: "log".into(),
            sink_type: SinkType::Log,
            queue_capacity: None,
            params: HashMap::new(),
        };
        assert_eq!(sink.effective_capacity(&core), 4);

        let sized = SinkConfig {
            queue_capacity: Some(0),
            ..sink
        };
        assert_eq!(sized.effective_capacity(&core), 1);
    }

    #[test]
    fn tick_period_from_hz() {
        let core = CoreSettings {
            tick_hz: 50.0,
            ..Default::default()
        };
        assert_eq!(core.tick_period(), Duration::from_millis(20));
    }
}
