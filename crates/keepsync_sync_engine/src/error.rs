//! Errors raised by a sync cycle.

use keepsync_model::ModelError;
use keepsync_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result alias for the engine.
pub type SyncResult<T> = Result<T, SyncError>;

/// Why a sync cycle stopped.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The exchange did not complete.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// True if a later cycle may succeed.
        retryable: bool,
    },

    /// Protocol error (unexpected exchange).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication failed after exhausting token refreshes.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The server answered with an error envelope.
    #[error("api error {code}: {message}")]
    Api {
        /// Status code.
        code: i64,
        /// Server message.
        message: String,
    },

    /// The server demands a local reset; sync again with `resync = true`.
    #[error("full resync required")]
    ResyncRequired,

    /// The server considers this client outdated.
    #[error("client upgrade recommended")]
    UpgradeRecommended,

    /// A delta could not be applied to the mirror.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// A message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// Local state could not be persisted or restored.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// `sync` called while a cycle is running.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the cycle can be retried as is.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Api { code, .. } => *code >= 500,
            SyncError::UpgradeRecommended => true,
            _ => false,
        }
    }

    /// Returns true if local state must be discarded before the next cycle.
    pub fn requires_resync(&self) -> bool {
        matches!(self, SyncError::ResyncRequired)
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::UpgradeRecommended.is_retryable());
        assert!(SyncError::Api { code: 503, message: "busy".into() }.is_retryable());
        assert!(!SyncError::Api { code: 400, message: "bad".into() }.is_retryable());
        assert!(!SyncError::ResyncRequired.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn resync_detection() {
        assert!(SyncError::ResyncRequired.requires_resync());
        assert!(!SyncError::NotConnected.requires_resync());
    }

    #[test]
    fn error_display() {
        let err = SyncError::NotConnected;
        assert_eq!(err.to_string(), "not connected to server");

        let err = SyncError::Api {
            code: 404,
            message: "missing".into(),
        };
        assert_eq!(err.to_string(), "api error 404: missing");

        let err: SyncError = ModelError::not_found("n1").into();
        assert!(err.to_string().starts_with("model error"));

        let err: SyncError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(matches!(err, SyncError::Persistence(_)));
    }
}
