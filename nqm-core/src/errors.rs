use std::io;

use thiserror::Error;

/// Result type used across the NQM core crate.
pub type Result<T> = std::result::Result<T, NqmError>;

/// Canonical error representation shared by all NQM crates.
#[derive(Debug, Error)]
pub enum NqmError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("deserialization error: {0}")]
    DeserializationError(String),

    #[error("invalid query: {0}")]
    QueryError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("general error: {0}")]
    GeneralError(String),
}

impl From<serde_json::Error> for NqmError {
    fn from(err: serde_json::Error) -> Self {
        NqmError::DeserializationError(err.to_string())
    }
}

impl From<anyhow::Error> for NqmError {
    fn from(err: anyhow::Error) -> Self {
        NqmError::GeneralError(err.to_string())
    }
}

/// Dedicated configuration error used by the configuration module.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for environment variable {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

impl From<ConfigError> for NqmError {
    fn from(value: ConfigError) -> Self {
        NqmError::ConfigError(value.to_string())
    }
}
