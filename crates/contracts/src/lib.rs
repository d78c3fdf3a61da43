//! # Contracts
//!
//! Frozen interface contracts shared by every skyrelay crate: the frame and
//! telemetry data model, the sink/backend/session boundary traits, the error
//! taxonomy and the injected settings structure.
//! Business crates depend on this crate only, never on each other's internals.
//!
//! ## Time Model
//! - `Frame::timestamp` / `TelemetrySnapshot::timestamp` are seconds (f64) on the
//!   producer's clock and are informational only
//! - ordering and freshness are decided by the monotonically increasing `sequence`

mod backoff;
mod blueprint;
mod endpoint;
mod error;
mod frame;
mod link;
mod session;
mod sink;
mod source;
mod telemetry;

pub use backoff::Backoff;
pub use blueprint::*;
pub use endpoint::{TransmitterEndpoint, VideoQuality};
pub use error::*;
pub use frame::{Frame, PixelFormat, RawFrame};
pub use link::LinkState;
pub use session::{
    CloudSession, DisconnectSignal, LocalCloudSession, LocalPresenter, Presenter, RoomConfig,
};
pub use sink::*;
pub use source::{CaptureBackend, MetricSampler, MetricSet};
pub use telemetry::TelemetrySnapshot;
