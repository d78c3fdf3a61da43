//! # Ingestion
//!
//! Frame and telemetry source adapters.
//!
//! Responsibilities:
//! - Poll the external capture backend / metric sampler on a fixed cadence
//! - Enforce strictly increasing sequences, turn backend failures into "no new value"
//! - Publish the most recent value into a single-slot holder (`latest()`)
//! - Track a smoothed production rate (`rate()`)
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{FrameSource, MockCaptureBackend};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let backend = MockCaptureBackend::new(Default::default());
//! let source = FrameSource::spawn(backend, 60.0, cancel.clone());
//! let feed = source.feed();
//! if let Some(frame) = feed.latest() {
//!     println!("frame {} at {:.1} fps", frame.sequence, feed.rate());
//! }
//! ```

mod error;
mod frame_source;
mod mock;
mod rate;
mod slot;
mod source;
mod telemetry_source;

// Re-exports
pub use error::{IngestionError, Result};
pub use frame_source::{FrameFeed, FrameSource};
pub use mock::{MockCaptureBackend, MockCaptureConfig, MockMetricSampler};
pub use rate::{RateMeter, SharedRate};
pub use slot::{latest_slot, LatestReader, LatestSlot};
pub use source::{Feed, Sequenced, SourceMetrics, SourceStats};
pub use telemetry_source::{TelemetryFeed, TelemetrySource};
