//! Record builders and mirror helpers.
//!
//! Builders produce node and label documents in the shape the server
//! sends, so tests can script deltas without hand-writing JSON.

use keepsync_model::{IdGenerator, Mirror, ROOT_ID};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

/// Timestamp used for every generated record.
pub const FIXTURE_TIME: &str = "2024-01-01T00:00:00.000Z";

/// Timestamp meaning "never".
pub const ZERO_TIME: &str = "1970-01-01T00:00:00.000Z";

/// Installs a test-friendly tracing subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `warn`. Safe to call
/// from every test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// An empty mirror with deterministic ids.
pub fn seeded_mirror(seed: u64) -> Mirror {
    Mirror::new(IdGenerator::seeded(seed))
}

/// A label document.
pub fn label_record(id: &str, name: &str) -> Value {
    json!({
        "mainId": id,
        "name": name,
        "timestamps": timestamps(),
        "lastMerged": ZERO_TIME,
    })
}

/// A deletion record: a known id without `parentId`.
pub fn tombstone(id: &str) -> Value {
    json!({ "id": id, "kind": "notes#node" })
}

/// A timestamps document marking a deleted record.
pub fn deleted_timestamps() -> Value {
    json!({
        "kind": "notes#timestamps",
        "created": FIXTURE_TIME,
        "updated": FIXTURE_TIME,
        "deleted": "2024-02-01T00:00:00.000Z",
    })
}

fn timestamps() -> Value {
    json!({
        "kind": "notes#timestamps",
        "created": FIXTURE_TIME,
        "updated": FIXTURE_TIME,
    })
}

/// Builder for node documents.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    fields: Map<String, Value>,
}

impl NodeRecord {
    fn base(id: &str, node_type: &str, parent: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("id".into(), json!(id));
        fields.insert("kind".into(), json!("notes#node"));
        fields.insert("type".into(), json!(node_type));
        fields.insert("parentId".into(), json!(parent));
        fields.insert("sortValue".into(), json!(0));
        fields.insert("text".into(), json!(""));
        fields.insert("timestamps".into(), timestamps());
        Self { fields }
    }

    /// A note under the root.
    pub fn note(id: &str) -> Self {
        Self::base(id, "NOTE", ROOT_ID)
    }

    /// A list under the root.
    pub fn list(id: &str) -> Self {
        Self::base(id, "LIST", ROOT_ID)
    }

    /// An unchecked, unindented item of `parent`.
    pub fn list_item(id: &str, parent: &str) -> Self {
        let mut record = Self::base(id, "LIST_ITEM", parent);
        record.fields.insert("checked".into(), json!(false));
        record.fields.insert("superListItemId".into(), json!(""));
        record
    }

    fn set(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Sets the parent id.
    pub fn parent(self, parent: &str) -> Self {
        self.set("parentId", json!(parent))
    }

    /// Sets the title.
    pub fn title(self, title: &str) -> Self {
        self.set("title", json!(title))
    }

    /// Sets the text.
    pub fn text(self, text: &str) -> Self {
        self.set("text", json!(text))
    }

    /// Sets the sort value.
    pub fn sort(self, sort: i64) -> Self {
        self.set("sortValue", json!(sort))
    }

    /// Sets the server id.
    pub fn server_id(self, server_id: &str) -> Self {
        self.set("serverId", json!(server_id))
    }

    /// Sets the base version.
    pub fn version(self, version: &str) -> Self {
        self.set("baseVersion", json!(version))
    }

    /// Sets the checked flag.
    pub fn checked(self, checked: bool) -> Self {
        self.set("checked", json!(checked))
    }

    /// Sets the color.
    pub fn color(self, color: &str) -> Self {
        self.set("color", json!(color))
    }

    /// Sets the pinned flag.
    pub fn pinned(self, pinned: bool) -> Self {
        self.set("isPinned", json!(pinned))
    }

    /// Nests the item under `super_item`.
    pub fn super_item(self, super_item: &str) -> Self {
        self.set("superListItemId", json!(super_item))
    }

    /// Adds a `listItem` move descriptor.
    pub fn nesting_move(self, prev_super: Option<&str>, super_item: Option<&str>) -> Self {
        let id = self.fields.get("id").cloned().unwrap_or(Value::Null);
        let descriptor = json!({
            "id": id,
            "prevSuperListItemId": prev_super.unwrap_or(""),
            "superListItemId": super_item.unwrap_or(""),
        });
        self.set("superListItemId", json!(super_item.unwrap_or("")))
            .set("listItem", descriptor)
    }

    /// Applies a label.
    pub fn label(mut self, label_id: &str) -> Self {
        let entry = json!({ "labelId": label_id, "deleted": ZERO_TIME });
        match self.fields.get_mut("labelIds").and_then(Value::as_array_mut) {
            Some(ids) => ids.push(entry),
            None => {
                self.fields.insert("labelIds".into(), json!([entry]));
            }
        }
        self
    }

    /// Marks the node trashed.
    pub fn trashed(mut self) -> Self {
        if let Some(ts) = self.fields.get_mut("timestamps").and_then(Value::as_object_mut) {
            ts.insert("trashed".into(), json!(FIXTURE_TIME));
        }
        self
    }

    /// Builds the document.
    pub fn build(self) -> Value {
        Value::Object(self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsync_model::{Label, Node, NodeType};

    #[test]
    fn records_load_as_nodes() {
        let mut ids = IdGenerator::seeded(1);
        let note = Node::from_json(&NodeRecord::note("n").title("T").pinned(true).build(), &mut ids)
            .unwrap()
            .unwrap();
        assert_eq!(note.node_type(), Some(NodeType::Note));
        assert!(note.top_level().unwrap().pinned());

        let item = NodeRecord::list_item("i", "l").checked(true).super_item("j").build();
        let item = Node::from_json(&item, &mut ids).unwrap().unwrap();
        assert!(item.list_item().unwrap().checked());
        assert_eq!(item.list_item().unwrap().super_list_item_id(), Some("j"));
    }

    #[test]
    fn trashed_and_labels() {
        let mut ids = IdGenerator::seeded(1);
        let raw = NodeRecord::list("l").label("a").label("b").trashed().build();
        assert_eq!(raw["labelIds"].as_array().unwrap().len(), 2);
        let node = Node::from_json(&raw, &mut ids).unwrap().unwrap();
        assert!(node.timestamps().is_trashed());
        assert!(node.top_level().unwrap().labels().contains("b"));
    }

    #[test]
    fn nesting_move_descriptor() {
        let raw = NodeRecord::list_item("i", "l").nesting_move(None, Some("p")).build();
        assert_eq!(raw["listItem"]["id"], "i");
        assert_eq!(raw["listItem"]["prevSuperListItemId"], "");
        assert_eq!(raw["superListItemId"], "p");
    }

    #[test]
    fn label_and_tombstone() {
        let label = Label::from_json(&label_record("tag.1", "Home")).unwrap();
        assert_eq!(label.name(), "Home");
        assert!(tombstone("x").get("parentId").is_none());
        assert!(seeded_mirror(4).store().is_empty());
        init_tracing();
        init_tracing();
    }
}
