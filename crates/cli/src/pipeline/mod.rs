//! Station orchestration module.

mod orchestrator;
mod stats;

pub use orchestrator::{Station, StationConfig};
pub use stats::StationStats;
