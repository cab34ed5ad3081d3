//! Persisted local state for resuming a session offline.

use crate::error::ModelResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A dump of the mirror: version, labels and nodes as unclean saves.
///
/// Restored through the same load paths used for server deltas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Last confirmed server version.
    pub keep_version: Option<String>,
    /// Label snapshots.
    pub labels: Vec<Value>,
    /// Node snapshots, parents before children.
    pub nodes: Vec<Value>,
}

impl Snapshot {
    /// Encodes to JSON.
    pub fn to_json(&self) -> ModelResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from JSON.
    pub fn from_json(s: &str) -> ModelResult<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_names() {
        let snapshot = Snapshot {
            keep_version: Some("42".into()),
            labels: vec![json!({"mainId": "tag.a"})],
            nodes: Vec::new(),
        };
        let encoded = snapshot.to_json().unwrap();
        assert!(encoded.contains("\"keep_version\":\"42\""));
        assert_eq!(Snapshot::from_json(&encoded).unwrap(), snapshot);
        assert!(Snapshot::from_json("{").is_err());
    }
}
