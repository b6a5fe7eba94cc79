//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Logging or configuration setup failed
    #[error(transparent)]
    Setup(#[from] contracts::ContractError),

    /// Input stream could not be read
    #[error("Failed to read input: {0}")]
    Input(#[from] std::io::Error),
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }
}
