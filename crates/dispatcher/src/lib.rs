//! # Dispatcher
//!
//! 数据分发模块。
//!
//! 负责：
//! - 按固定节拍读取最新的视频帧和遥测快照
//! - Fan-out 到多个 sinks（每个 sink 独立邮箱，满则丢弃最旧）
//! - 隔离慢 sink，不阻塞主链路
//! - 汇报每个 sink 的健康状态，支持重启

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod mailbox;
pub mod metrics;
pub mod sinks;

#[cfg(test)]
mod testing;

pub use contracts::{DataSink, SinkHealth, SinkItem};
pub use dispatcher::{DispatchStats, Dispatcher, DispatcherBuilder, DispatcherControl};
pub use error::DispatcherError;
pub use handle::{SinkHandle, StopOutcome};
pub use mailbox::{mailbox, MailboxClosed, MailboxReceiver, MailboxSender, Offer};
pub use metrics::{MetricsSnapshot, SinkMetrics, SinkStatus};
pub use sinks::{
    CloudSink, CloudState, LogSink, PresentationHub, PresentationSink, TracingCloudSession,
    TransmitterSink, DEFAULT_HUB_CAPACITY, TELEMETRY_TOPIC,
};
