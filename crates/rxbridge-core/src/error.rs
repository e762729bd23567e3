//! Error types for the handler bridge.
//!
//! Everything a handler can observe from the control plane, plus the ambient
//! failures of the endpoint itself, is a `BridgeError`. Handler faults are
//! carried as `anyhow::Error` and never converted into this type.

use crate::config::InvokeConfig;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // Caller errors
    #[error("handler not found: {0}")]
    HandlerNotFound(String),

    // Control-plane errors
    #[error("control-plane response timed out after {0:?}")]
    Timeout(Duration),

    #[error("control-plane transport error: {message}")]
    Transport { message: String },

    #[error("{message}")]
    Remote { code: i32, message: String },

    #[error("unexpected control-plane response: expected {expected}, got {actual}")]
    UnexpectedReply {
        expected: &'static str,
        actual: &'static str,
    },

    // IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl BridgeError {
    /// Build a transport error from any displayable cause.
    pub fn transport(message: impl Into<String>) -> Self {
        BridgeError::Transport {
            message: message.into(),
        }
    }

    /// Build a remote error, substituting `<op> failed` for an empty message.
    pub fn remote(code: i32, message: &str, op: &str) -> Self {
        let message = if message.is_empty() {
            format!("{} failed", op)
        } else {
            message.to_string()
        };
        BridgeError::Remote { code, message }
    }

    /// Status code reported in an invoke response for this error.
    ///
    /// Zero is reserved for success, so this never returns 0. Remote errors
    /// keep the service's own code.
    pub fn status_code(&self) -> i32 {
        match self {
            BridgeError::Remote { code, .. } if *code != 0 => *code,
            BridgeError::HandlerNotFound(_) => InvokeConfig::NOT_FOUND_CODE,
            _ => InvokeConfig::HANDLER_FAULT_CODE,
        }
    }

    /// Whether this error came from the control stream rather than the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::Timeout(_) | BridgeError::Transport { .. }
        )
    }
}
