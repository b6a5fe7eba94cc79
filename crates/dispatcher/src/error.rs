//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Adapter creation error
    #[error("failed to create sink for destination '{destination}': {message}")]
    SinkCreation {
        destination: String,
        message: String,
    },

    /// Two handles registered for the same destination
    #[error("duplicate dispatch handle for destination '{0}'")]
    DuplicateDestination(String),

    /// Error from contract
    #[error("contract error: {0}")]
    Contract(#[from] contracts::ContractError),
}

impl DispatcherError {
    /// Create a sink creation error
    pub fn sink_creation(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            destination: destination.into(),
            message: message.into(),
        }
    }
}
