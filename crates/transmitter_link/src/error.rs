//! Link error types

use contracts::{ContractError, LinkState};
use thiserror::Error;

/// Why an inbound unit was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("missing start marker")]
    BadMarker,

    #[error("truncated unit: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("length mismatch: header declares {declared} payload bytes, unit carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("checksum mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    Checksum { expected: u16, computed: u16 },

    #[error("malformed {what} payload")]
    Payload { what: &'static str },
}

/// Transmitter link error
#[derive(Debug, Error)]
pub enum LinkError {
    /// Corrupt or short unit; dropped and counted
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Transport I/O failure
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The other end of the transport is gone
    #[error("transport closed")]
    Closed,

    #[error("command seq {seq} timed out after {retries} retries")]
    CommandTimeout { seq: u16, retries: u32 },

    #[error("link not connected (state {state})")]
    NotConnected { state: LinkState },

    #[error("too many commands in flight (limit {limit})")]
    Busy { limit: usize },

    #[error("payload too large: {len} bytes")]
    PayloadTooLarge { len: usize },

    /// Recovery window exhausted
    #[error("link lost: {0}")]
    LinkLost(String),

    #[error("link engine stopped")]
    EngineStopped,
}

impl LinkError {
    /// Worth retrying later
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Framing(_) | Self::Busy { .. })
    }
}

impl From<LinkError> for ContractError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Framing(e) => ContractError::ProtocolFraming {
                message: e.to_string(),
            },
            LinkError::Io(e) => ContractError::transient(e.to_string()),
            LinkError::CommandTimeout { seq, retries } => {
                ContractError::CommandTimeout { seq, retries }
            }
            LinkError::NotConnected { .. } | LinkError::Busy { .. } => {
                ContractError::transient(err.to_string())
            }
            LinkError::Closed | LinkError::LinkLost(_) | LinkError::EngineStopped => {
                ContractError::link_lost(err.to_string())
            }
            LinkError::PayloadTooLarge { .. } => ContractError::Other(err.to_string()),
        }
    }
}
