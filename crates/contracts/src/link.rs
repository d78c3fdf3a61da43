//! LinkState - transmitter link connection state

use serde::{Deserialize, Serialize};

/// Transmitter link connection state
///
/// `Disconnected -> Handshaking -> Connected -> (Recovering) -> Disconnected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// No transport open
    #[default]
    Disconnected,
    /// Transport open, waiting for handshake acknowledgement
    Handshaking,
    /// Normal operation
    Connected,
    /// Heartbeat lost, re-handshaking with backoff
    Recovering,
}

impl LinkState {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Handshaking => "handshaking",
            Self::Connected => "connected",
            Self::Recovering => "recovering",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
