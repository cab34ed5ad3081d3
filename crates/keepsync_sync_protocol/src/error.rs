//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The payload is not valid JSON for the expected message.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is JSON but not a recognizable message.
    #[error("invalid message structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },
}

impl ProtocolError {
    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = ProtocolError::invalid_structure("expected object");
        assert_eq!(err.to_string(), "invalid message structure: expected object");

        let err: ProtocolError = serde_json::from_str::<u8>("x").unwrap_err().into();
        assert!(err.to_string().starts_with("invalid JSON"));
    }
}
