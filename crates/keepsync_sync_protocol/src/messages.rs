//! Messages exchanged with the changes endpoint.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capabilities advertised by default.
pub const DEFAULT_CAPABILITIES: &[&str] = &[
    "NC", "PI", "LB", "AN", "SH", "DR", "TR", "IN", "SNB", "MI", "CO",
];

/// Four-part client version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientVersion {
    /// Major.
    pub major: String,
    /// Minor.
    pub minor: String,
    /// Build.
    pub build: String,
    /// Revision.
    pub revision: String,
}

impl ClientVersion {
    /// Creates a version from its parts.
    pub fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            major: major.to_string(),
            minor: minor.to_string(),
            build: build.to_string(),
            revision: revision.to_string(),
        }
    }
}

impl Default for ClientVersion {
    fn default() -> Self {
        Self::new(9, 9, 9, 9)
    }
}

/// One advertised capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Capability code.
    #[serde(rename = "type")]
    pub kind: String,
}

/// Client identification sent with every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHeader {
    /// Session id, stable for the lifetime of a client.
    pub client_session_id: String,
    /// Platform name.
    pub client_platform: String,
    /// Client version.
    pub client_version: ClientVersion,
    /// Advertised capabilities.
    pub capabilities: Vec<Capability>,
}

impl RequestHeader {
    /// Creates a header.
    pub fn new(
        session_id: impl Into<String>,
        platform: impl Into<String>,
        version: ClientVersion,
        capabilities: &[String],
    ) -> Self {
        Self {
            client_session_id: session_id.into(),
            client_platform: platform.into(),
            client_version: version,
            capabilities: capabilities
                .iter()
                .map(|c| Capability { kind: c.clone() })
                .collect(),
        }
    }
}

/// Account-level data carried next to node records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    /// The full label list. Absent when labels are unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<Value>>,
}

/// One page of the outgoing delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesRequest {
    /// Last confirmed version; absent for a full resync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,
    /// Client clock in epoch milliseconds.
    pub client_timestamp: String,
    /// Clean saves of dirty nodes.
    #[serde(default)]
    pub nodes: Vec<Value>,
    /// Labels, present only when some label changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
    /// Client identification.
    pub request_header: RequestHeader,
}

impl ChangesRequest {
    /// Creates an empty request stamped with `timestamp_ms`.
    pub fn new(header: RequestHeader, timestamp_ms: i64) -> Self {
        Self {
            target_version: None,
            client_timestamp: timestamp_ms.to_string(),
            nodes: Vec::new(),
            user_info: None,
            request_header: header,
        }
    }

    /// Sets the target version.
    pub fn with_target_version(mut self, version: Option<String>) -> Self {
        self.target_version = version;
        self
    }

    /// Sets the node records.
    pub fn with_nodes(mut self, nodes: Vec<Value>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Sets the label list. `None` omits `userInfo` entirely.
    pub fn with_labels(mut self, labels: Option<Vec<Value>>) -> Self {
        self.user_info = labels.map(|labels| UserInfo {
            labels: Some(labels),
        });
        self
    }

    /// The label list, if present.
    pub fn labels(&self) -> Option<&[Value]> {
        self.user_info.as_ref()?.labels.as_deref()
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// One page of the incoming delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesResponse {
    /// Version reached after this page.
    pub to_version: String,
    /// More pages remain.
    #[serde(default)]
    pub truncated: bool,
    /// The server demands a local reset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_full_resync: Option<bool>,
    /// The server considers the client outdated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_recommended: Option<bool>,
    /// Account-level data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
    /// Node records.
    #[serde(default)]
    pub nodes: Vec<Value>,
}

impl ChangesResponse {
    /// Creates an empty page.
    pub fn new(to_version: impl Into<String>) -> Self {
        Self {
            to_version: to_version.into(),
            ..Self::default()
        }
    }

    /// Returns true if the flag is present, whatever its value.
    pub fn requires_full_resync(&self) -> bool {
        self.force_full_resync.is_some()
    }

    /// Returns true if the flag is present, whatever its value.
    pub fn recommends_upgrade(&self) -> bool {
        self.upgrade_recommended.is_some()
    }

    /// The label list, if present.
    pub fn labels(&self) -> Option<&[Value]> {
        self.user_info.as_ref()?.labels.as_deref()
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Body of an API error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// HTTP-like status code.
    pub code: i64,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

impl ApiErrorBody {
    /// Returns true for an authorization failure.
    pub fn is_unauthorized(&self) -> bool {
        self.code == 401
    }
}

/// A reply from the endpoint: an error envelope or a delta page.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiReply {
    /// `{"error": {...}}`.
    Error(ApiErrorBody),
    /// A delta page.
    Changes(ChangesResponse),
}

impl ApiReply {
    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        match self {
            ApiReply::Error(body) => Ok(serde_json::to_vec(&serde_json::json!({ "error": body }))?),
            ApiReply::Changes(response) => response.encode(),
        }
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        if !value.is_object() {
            return Err(ProtocolError::invalid_structure("expected object"));
        }
        match value.get("error") {
            Some(error) => Ok(ApiReply::Error(serde_json::from_value(error.clone())?)),
            None => Ok(ApiReply::Changes(serde_json::from_value(value)?)),
        }
    }
}
