//! Error types for the saylimit crate.

use thiserror::Error;

/// Main error type for saylimit operations.
#[derive(Error, Debug)]
pub enum SaylimitError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for SaylimitError {
    fn from(err: config::ConfigError) -> Self {
        SaylimitError::Config(err.to_string())
    }
}

/// Result type alias for saylimit operations.
pub type Result<T> = std::result::Result<T, SaylimitError>;
