//! Layered error definitions
//!
//! Categorized by source: config / transport / protocol / sink

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Transport / Protocol Errors =====
    /// Recoverable I/O failure; the caller backs off and retries
    #[error("transient io error: {message}")]
    TransientIo { message: String },

    /// Corrupt or short unit on the wire, dropped and counted
    #[error("protocol framing error: {message}")]
    ProtocolFraming { message: String },

    /// A command exhausted its retries without an acknowledgement
    #[error("command {seq} timed out after {retries} retries")]
    CommandTimeout { seq: u16, retries: u32 },

    /// The transmitter link lost its peer and could not recover
    #[error("link lost: {message}")]
    LinkLost { message: String },

    // ===== Sink Errors =====
    /// Mailbox/channel closed unexpectedly; the sink stays disconnected until restarted
    #[error("sink '{sink_name}' fatal error: {message}")]
    SinkFatal { sink_name: String, message: String },

    /// Cloud session dropped by the remote side
    #[error("session lost: {message}")]
    SessionLost { message: String },

    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    /// Sink connection error
    #[error("sink '{sink_name}' connection error: {message}")]
    SinkConnection { sink_name: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create transient io error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientIo {
            message: message.into(),
        }
    }

    /// Create link lost error
    pub fn link_lost(message: impl Into<String>) -> Self {
        Self::LinkLost {
            message: message.into(),
        }
    }

    /// Create sink fatal error
    pub fn sink_fatal(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkFatal {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Create session lost error
    pub fn session_lost(message: impl Into<String>) -> Self {
        Self::SessionLost {
            message: message.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Create sink connection error
    pub fn sink_connection(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkConnection {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Errors after which a sink worker must stop and report `Disconnected`
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SinkFatal { .. } | Self::LinkLost { .. })
    }

    /// Errors that warrant a backoff and retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientIo { .. } | Self::SessionLost { .. } | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(ContractError::sink_fatal("tx", "closed").is_fatal());
        assert!(ContractError::link_lost("heartbeat").is_fatal());
        assert!(!ContractError::transient("again").is_fatal());
        assert!(!ContractError::CommandTimeout { seq: 3, retries: 3 }.is_fatal());
    }

    #[test]
    fn transient_classification() {
        assert!(ContractError::transient("busy").is_transient());
        assert!(ContractError::session_lost("room closed").is_transient());
        assert!(!ContractError::sink_write("x", "bad").is_transient());
    }

    #[test]
    fn display_includes_context() {
        let err = ContractError::CommandTimeout { seq: 42, retries: 3 };
        assert_eq!(err.to_string(), "command 42 timed out after 3 retries");
    }
}
