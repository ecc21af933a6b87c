//! Custom error types for the connector workflow

use common::error::StorageError;
use thiserror::Error;

/// Custom error type for the connector workflow
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// Bad credentials, expired session, or a failed login round trip
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Non-zero response envelope
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// Client-side required-field or precondition failure
    #[error("Validation failed on {field}: {message}")]
    Validation { field: String, message: String },

    /// The host platform rejected the final submission
    #[error("Host rejected the configuration: {0}")]
    HostCommit(String),

    /// The host platform was detected but its ready handshake failed
    #[error("Host platform unavailable: {0}")]
    HostUnavailable(String),

    /// Connection, timeout or undecodable response
    #[error("Transport error: {0}")]
    Transport(String),

    /// Durable client storage failed
    #[error("Storage error: {0}")]
    Storage(String),
}

impl WorkflowError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        WorkflowError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Errors that must send the user back to re-authentication
    pub fn is_auth(&self) -> bool {
        matches!(self, WorkflowError::Auth(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, WorkflowError::Validation { .. })
    }

    /// Text suitable for a transient user notification
    pub fn user_message(&self) -> String {
        match self {
            WorkflowError::Auth(msg) => format!("Please sign in again: {}", msg),
            WorkflowError::Api { message, .. } => message.clone(),
            WorkflowError::Validation { message, .. } => message.clone(),
            WorkflowError::HostCommit(msg) => format!("Saving the configuration failed: {}", msg),
            WorkflowError::HostUnavailable(msg) => {
                format!("Initialization failed, please reload: {}", msg)
            }
            WorkflowError::Transport(msg) => format!("Network error: {}", msg),
            WorkflowError::Storage(msg) => format!("Local storage error: {}", msg),
        }
    }
}

impl From<StorageError> for WorkflowError {
    fn from(err: StorageError) -> Self {
        WorkflowError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for WorkflowError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WorkflowError::Transport(format!("request timed out: {}", err))
        } else {
            WorkflowError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        WorkflowError::Transport(format!("unexpected response payload: {}", err))
    }
}

/// Type alias for workflow results
pub type WorkflowResult<T> = Result<T, WorkflowError>;
