//! Layered error definitions
//!
//! Categorized by source: config / input / destination / logging

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

    // ===== Input Errors =====
    /// Producer handed over something that is not a string-keyed mapping
    #[error("invalid record input: expected a JSON object, got {found}")]
    InvalidInput { found: String },

    // ===== Destination Errors =====
    /// Publish attempt against a destination failed
    #[error("destination '{destination}' publish error: {message}")]
    Destination {
        destination: String,
        message: String,
    },

    // ===== Logging Errors =====
    /// Logging facility could not be installed
    #[error("logging setup error: {message}")]
    LoggingSetup { message: String },

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

    /// Create destination publish error
    pub fn destination(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Destination {
            destination: destination.into(),
            message: message.into(),
        }
    }

    /// Create logging setup error
    pub fn logging_setup(message: impl Into<String>) -> Self {
        Self::LoggingSetup {
            message: message.into(),
        }
    }
}
