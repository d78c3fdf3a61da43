//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Sink creation error
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// Two sinks share a name
    #[error("duplicate sink name '{name}'")]
    DuplicateSink { name: String },

    /// Control request for a sink that is not registered
    #[error("unknown sink '{name}'")]
    UnknownSink { name: String },

    /// The sink's worker is gone; it is skipped until restarted
    #[error("mailbox of sink '{sink_name}' is closed")]
    MailboxClosed { sink_name: String },

    /// The dispatcher stopped serving control requests
    #[error("dispatcher is not running")]
    Stopped,

    /// Sink error (from contract)
    #[error("sink error: {0}")]
    Contract(#[from] contracts::ContractError),
}

impl DispatcherError {
    /// Create a sink creation error
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}
