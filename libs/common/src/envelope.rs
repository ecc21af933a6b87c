//! Backend response envelope
//!
//! Every backend response is wrapped as `{code, msg, data}`. A zero code is
//! success; anything else carries a user-displayable message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Success
pub const CODE_SUCCESS: i64 = 0;
/// Invalid request parameters
pub const CODE_PARAM_ERROR: i64 = 10001;
/// Invalid connection or table configuration
pub const CODE_CONFIG_ERROR: i64 = 10002;
/// The caller lacks permission for the resource
pub const CODE_INSUFFICIENT_AUTH: i64 = 10003;
/// Authentication failed or the session expired
pub const CODE_AUTH_FAILED: i64 = 10004;
/// A downstream system (database, platform) failed
pub const CODE_THIRD_PARTY_ERROR: i64 = 10005;

/// Uniform response wrapper used by the backend API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Value,
}

/// The non-success half of an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeFailure {
    pub code: i64,
    pub message: String,
}

impl Envelope {
    /// Build a success envelope around `data`
    pub fn success(data: Value) -> Self {
        Self {
            code: CODE_SUCCESS,
            msg: String::new(),
            data,
        }
    }

    /// Build a failure envelope
    pub fn failure(code: i64, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data: Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_SUCCESS
    }

    /// Whether the backend reports an expired or invalid session
    pub fn is_auth_expired(&self) -> bool {
        self.code == CODE_AUTH_FAILED
    }

    /// Split the envelope into its payload or its failure
    pub fn into_data(self) -> Result<Value, EnvelopeFailure> {
        if self.is_success() {
            Ok(self.data)
        } else {
            let message = if self.msg.is_empty() {
                describe_code(self.code).to_string()
            } else {
                self.msg
            };
            Err(EnvelopeFailure {
                code: self.code,
                message,
            })
        }
    }
}

/// Fallback text for a failure code when the backend sent no message
pub fn describe_code(code: i64) -> &'static str {
    match code {
        CODE_SUCCESS => "success",
        CODE_PARAM_ERROR => "invalid parameters",
        CODE_CONFIG_ERROR => "invalid configuration",
        CODE_INSUFFICIENT_AUTH => "insufficient permission",
        CODE_AUTH_FAILED => "authentication failed",
        CODE_THIRD_PARTY_ERROR => "third-party system error",
        _ => "unknown error",
    }
}
