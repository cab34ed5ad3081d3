//! Sharing state of a top-level node.

use crate::element::Element;
use crate::error::{ModelError, ModelResult};
use crate::fields::req_str;
use crate::settings::wire_enum;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

wire_enum! {
    /// Role of a confirmed collaborator.
    RoleValue {
        /// Owner of the note.
        Owner => "O",
        /// Collaborator with write access.
        User => "W",
    }
}

wire_enum! {
    /// A pending share request.
    ShareRequestValue {
        /// Grant access.
        Add => "WR",
        /// Revoke access.
        Remove => "RM",
    }
}

/// Sharing state for one email address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    /// Confirmed by the server.
    Role(RoleValue),
    /// Waiting to be sent.
    Request(ShareRequestValue),
}

/// Collaborators of a note or list.
///
/// Loaded from and saved to the `roleInfo` and `shareRequests` keys of the
/// node snapshot. Unclean saves append a `{"type": <dirty>}` marker to the
/// request list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeCollaborators {
    collaborators: BTreeMap<String, Collaborator>,
    dirty: bool,
}

impl NodeCollaborators {
    /// Number of tracked addresses.
    pub fn len(&self) -> usize {
        self.collaborators.len()
    }

    /// Returns true if no addresses are tracked.
    pub fn is_empty(&self) -> bool {
        self.collaborators.is_empty()
    }

    /// Looks up the state of an address.
    pub fn get(&self, email: &str) -> Option<Collaborator> {
        self.collaborators.get(email).copied()
    }

    /// Queues a share with `email`.
    pub fn add(&mut self, email: impl Into<String>) {
        let email = email.into();
        if !matches!(self.collaborators.get(&email), Some(Collaborator::Role(_))) {
            self.collaborators
                .insert(email, Collaborator::Request(ShareRequestValue::Add));
            self.dirty = true;
        }
    }

    /// Queues removal of `email`. A pending add is simply dropped.
    pub fn remove(&mut self, email: &str) {
        match self.collaborators.get(email) {
            Some(Collaborator::Request(ShareRequestValue::Add)) => {
                self.collaborators.remove(email);
            }
            Some(_) => {
                self.collaborators.insert(
                    email.to_owned(),
                    Collaborator::Request(ShareRequestValue::Remove),
                );
            }
            None => return,
        }
        self.dirty = true;
    }

    /// Addresses with access or a pending grant.
    pub fn all(&self) -> Vec<&str> {
        self.collaborators
            .iter()
            .filter(|(_, c)| {
                matches!(
                    c,
                    Collaborator::Role(_) | Collaborator::Request(ShareRequestValue::Add)
                )
            })
            .map(|(email, _)| email.as_str())
            .collect()
    }
}

impl Element for NodeCollaborators {
    fn load(&mut self, raw: &Value) -> ModelResult<()> {
        let mut collaborators = BTreeMap::new();
        let mut dirty = false;

        if let Some(roles) = raw.get("roleInfo").and_then(Value::as_array) {
            for entry in roles {
                let email = req_str(entry, "email")?;
                let role = req_str(entry, "role")?;
                let role = RoleValue::from_wire(&role)
                    .ok_or_else(|| ModelError::parse(format!("unknown role {role}"), entry))?;
                collaborators.insert(email, Collaborator::Role(role));
            }
        }

        if let Some(requests) = raw.get("shareRequests").and_then(Value::as_array) {
            let mut requests = requests.as_slice();
            if let Some((last, rest)) = requests.split_last() {
                if let Some(flag) = last.get("type").and_then(Value::as_bool) {
                    dirty = flag;
                    requests = rest;
                }
            }
            for entry in requests {
                let email = req_str(entry, "email")?;
                let kind = req_str(entry, "type")?;
                let kind = ShareRequestValue::from_wire(&kind).ok_or_else(|| {
                    ModelError::parse(format!("unknown share request {kind}"), entry)
                })?;
                collaborators.insert(email, Collaborator::Request(kind));
            }
        }

        self.collaborators = collaborators;
        self.dirty = dirty;
        Ok(())
    }

    fn save(&mut self, clean: bool) -> Value {
        let mut roles = Vec::new();
        let mut requests = Vec::new();
        for (email, collaborator) in &self.collaborators {
            match collaborator {
                Collaborator::Role(role) => {
                    roles.push(json!({"email": email, "role": role.as_str()}));
                }
                Collaborator::Request(request) => {
                    requests.push(json!({"email": email, "type": request.as_str()}));
                }
            }
        }
        if clean {
            self.dirty = false;
        } else {
            requests.push(json!({"type": self.dirty}));
        }

        let mut map = Map::new();
        map.insert("roleInfo".into(), Value::Array(roles));
        map.insert("shareRequests".into(), Value::Array(requests));
        Value::Object(map)
    }

    fn dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove() {
        let mut c = NodeCollaborators::default();
        c.add("a@example.com");
        assert!(c.dirty());
        assert_eq!(c.all(), vec!["a@example.com"]);

        c.remove("a@example.com");
        assert!(c.is_empty());
        c.remove("nobody@example.com");
    }

    #[test]
    fn removing_confirmed_user_queues_request() {
        let mut c = NodeCollaborators::default();
        c.load(&json!({
            "roleInfo": [{"email": "o@example.com", "role": "O"}, {"email": "w@example.com", "role": "W"}]
        }))
        .unwrap();
        assert!(!c.dirty());

        c.remove("w@example.com");
        assert_eq!(
            c.get("w@example.com"),
            Some(Collaborator::Request(ShareRequestValue::Remove))
        );
        assert_eq!(c.all(), vec!["o@example.com"]);
    }

    #[test]
    fn round_trip_keeps_dirty_marker() {
        let mut c = NodeCollaborators::default();
        c.add("x@example.com");
        let saved = c.save(false);
        assert_eq!(saved["shareRequests"].as_array().unwrap().len(), 2);

        let mut loaded = NodeCollaborators::default();
        loaded.load(&saved).unwrap();
        assert_eq!(loaded, c);
        assert!(loaded.dirty());

        let clean = loaded.save(true);
        assert_eq!(clean["shareRequests"].as_array().unwrap().len(), 1);
        assert!(!loaded.dirty());
    }
}
