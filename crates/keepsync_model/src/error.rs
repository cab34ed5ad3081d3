//! Error types for the keepsync data model.

use serde_json::Value;
use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while loading or mutating the note tree.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A snapshot fragment could not be loaded.
    #[error("parse error: {message}")]
    Parse {
        /// Description of the problem.
        message: String,
        /// The offending raw fragment.
        raw: Value,
    },

    /// The server reported a merge conflict for a node.
    #[error("merge conflict on node {node_id}")]
    Merge {
        /// Local id of the conflicting node.
        node_id: String,
    },

    /// Local API misuse.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the misuse.
        message: String,
    },

    /// A referenced node does not exist.
    #[error("node not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: String,
    },

    /// Label registry error.
    #[error("label error: {message}")]
    Label {
        /// Description of the problem.
        message: String,
    },

    /// No gapped sort key is left at the requested end of a list.
    #[error("sort keys exhausted in list {list_id}")]
    SortKeyExhausted {
        /// The list that ran out of keys.
        list_id: String,
    },

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    /// Creates a parse error carrying the raw fragment.
    pub fn parse(message: impl Into<String>, raw: &Value) -> Self {
        Self::Parse {
            message: message.into(),
            raw: raw.clone(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Returns true if this error only concerns a single entity.
    ///
    /// Such errors are logged and the record discarded during reconciliation.
    pub fn is_entity_local(&self) -> bool {
        matches!(self, ModelError::Parse { .. } | ModelError::Merge { .. })
    }
}
