//! Sink implementations
//!
//! Contains LogSink, TransmitterSink, CloudSink and PresentationSink.

mod cloud;
mod log;
mod presentation;
mod transmitter;

pub use self::cloud::{CloudSink, CloudState, TracingCloudSession, TELEMETRY_TOPIC};
pub use self::log::LogSink;
pub use self::presentation::{PresentationHub, PresentationSink, DEFAULT_HUB_CAPACITY};
pub use self::transmitter::TransmitterSink;
