//! Custom error types for the common library
//!
//! This module defines the error types shared by the storage and
//! configuration layers.

use thiserror::Error;

/// Custom error type for durable storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Error occurred while reading or writing the backing file
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error occurred while encoding or decoding a stored value
    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage lock was poisoned by a panicking writer
    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Type alias for Result with StorageError
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised while loading client configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The underlying configuration sources could not be merged
    #[error("Configuration source error: {0}")]
    Source(#[from] config::ConfigError),

    /// A value was present but not acceptable
    #[error("Invalid configuration value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Type alias for Result with ConfigError
pub type ConfigResult<T> = Result<T, ConfigError>;
