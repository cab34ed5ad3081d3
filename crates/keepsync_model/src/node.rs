//! Nodes of the note tree.
//!
//! A [`Node`] holds the fields shared by every node and a
//! [`NodeKind`] payload for the per-type state. Tree links (`parent`,
//! `children`, list nesting) are ids resolved through the
//! [`NodeStore`](crate::store::NodeStore) arena.

use crate::annotations::NodeAnnotations;
use crate::blob::NodeBlob;
use crate::collaborators::NodeCollaborators;
use crate::element::Element;
use crate::error::{ModelError, ModelResult};
use crate::fields::{finish_save, object, opt_bool, opt_i64, opt_str, opt_token, read_dirty, req_str, required};
use crate::id::IdGenerator;
use crate::labels::NodeLabels;
use crate::settings::{wire_enum, NodeSettings};
use crate::timestamps::NodeTimestamps;
use serde_json::{Map, Value};
use tracing::warn;

/// Id of the root node.
pub const ROOT_ID: &str = "root";

const NODE_KIND: &str = "notes#node";

wire_enum! {
    /// Type of a node.
    NodeType {
        /// A note.
        Note => "NOTE",
        /// A checklist.
        List => "LIST",
        /// A checklist item, or the text holder of a note.
        ListItem => "LIST_ITEM",
        /// An attachment.
        Blob => "BLOB",
    }
}

wire_enum! {
    /// Background color of a note or list.
    ColorValue {
        /// White.
        Default => "DEFAULT",
        /// Red.
        Red => "RED",
        /// Orange.
        Orange => "ORANGE",
        /// Yellow.
        Yellow => "YELLOW",
        /// Green.
        Green => "GREEN",
        /// Teal.
        Teal => "TEAL",
        /// Blue.
        Blue => "BLUE",
        /// Dark blue.
        Cerulean => "CERULEAN",
        /// Purple.
        Purple => "PURPLE",
        /// Pink.
        Pink => "PINK",
        /// Brown.
        Brown => "BROWN",
        /// Gray.
        Gray => "GRAY",
    }
}

/// State shared by notes and lists.
#[derive(Debug, Clone, PartialEq)]
pub struct TopLevel {
    pub(crate) color: ColorValue,
    pub(crate) archived: bool,
    pub(crate) pinned: bool,
    pub(crate) title: String,
    pub(crate) labels: NodeLabels,
    pub(crate) collaborators: NodeCollaborators,
}

impl Default for TopLevel {
    fn default() -> Self {
        Self {
            color: ColorValue::Default,
            archived: false,
            pinned: false,
            title: String::new(),
            labels: NodeLabels::default(),
            collaborators: NodeCollaborators::default(),
        }
    }
}

impl TopLevel {
    /// Background color.
    pub fn color(&self) -> ColorValue {
        self.color
    }

    /// Whether the node is archived.
    pub fn archived(&self) -> bool {
        self.archived
    }

    /// Whether the node is pinned.
    pub fn pinned(&self) -> bool {
        self.pinned
    }

    /// Title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Label links.
    pub fn labels(&self) -> &NodeLabels {
        &self.labels
    }

    /// Label links for mutation.
    pub fn labels_mut(&mut self) -> &mut NodeLabels {
        &mut self.labels
    }

    /// Collaborators.
    pub fn collaborators(&self) -> &NodeCollaborators {
        &self.collaborators
    }

    /// Collaborators for mutation.
    pub fn collaborators_mut(&mut self) -> &mut NodeCollaborators {
        &mut self.collaborators
    }

    fn load(&mut self, raw: &Value) -> ModelResult<()> {
        self.color = match opt_str(raw, "color") {
            Some(s) => ColorValue::from_wire(&s)
                .ok_or_else(|| ModelError::parse(format!("unknown color {s}"), raw))?,
            None => ColorValue::Default,
        };
        self.archived = opt_bool(raw, "isArchived").unwrap_or(false);
        self.pinned = opt_bool(raw, "isPinned").unwrap_or(false);
        self.title = opt_str(raw, "title").unwrap_or_default();
        match raw.get("labelIds") {
            Some(ids) if !ids.is_null() => self.labels.load(ids)?,
            _ => self.labels.load(&Value::Array(Vec::new()))?,
        }
        self.collaborators.load(raw)
    }

    fn save(&mut self, map: &mut Map<String, Value>, clean: bool) {
        map.insert("color".into(), Value::from(self.color.as_str()));
        map.insert("isArchived".into(), Value::from(self.archived));
        map.insert("isPinned".into(), Value::from(self.pinned));
        map.insert("title".into(), Value::from(self.title.clone()));
        let labels = self.labels.save(clean);
        if labels.as_array().is_some_and(|l| !l.is_empty()) {
            map.insert("labelIds".into(), labels);
        }
        if let Value::Object(collaborators) = self.collaborators.save(clean) {
            map.extend(collaborators);
        }
    }

    fn dirty(&self) -> bool {
        self.labels.dirty() || self.collaborators.dirty()
    }
}

/// State of a list item.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListItemData {
    pub(crate) checked: bool,
    pub(crate) super_list_item_id: Option<String>,
    pub(crate) prev_super_list_item_id: Option<String>,
    pub(crate) parent_server_id: Option<String>,
    pub(crate) parent_item: Option<String>,
    pub(crate) subitems: Vec<String>,
}

impl ListItemData {
    /// Whether the item is checked.
    pub fn checked(&self) -> bool {
        self.checked
    }

    /// Id of the item this one is indented under, as last saved or loaded.
    pub fn super_list_item_id(&self) -> Option<&str> {
        self.super_list_item_id.as_deref()
    }

    /// Value of `super_list_item_id` before the last load.
    pub fn prev_super_list_item_id(&self) -> Option<&str> {
        self.prev_super_list_item_id.as_deref()
    }

    /// Server id of the owning list.
    pub fn parent_server_id(&self) -> Option<&str> {
        self.parent_server_id.as_deref()
    }

    /// Item this one is currently nested under.
    pub fn parent_item(&self) -> Option<&str> {
        self.parent_item.as_deref()
    }

    /// Items nested under this one, in nesting order.
    pub fn subitems(&self) -> &[String] {
        &self.subitems
    }

    /// Returns true if the item is nested under another item.
    pub fn indented(&self) -> bool {
        self.parent_item.is_some()
    }
}

/// Per-type payload of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// The tree root.
    Root,
    /// A note.
    Note(TopLevel),
    /// A checklist.
    List(TopLevel),
    /// A checklist item.
    ListItem(ListItemData),
    /// An attachment. `None` until the server describes it.
    Blob(Option<NodeBlob>),
}

/// A node of the note tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) id: String,
    pub(crate) server_id: Option<String>,
    pub(crate) parent_id: Option<String>,
    pub(crate) sort: i64,
    pub(crate) version: Option<String>,
    pub(crate) text: String,
    pub(crate) timestamps: NodeTimestamps,
    pub(crate) settings: NodeSettings,
    pub(crate) annotations: NodeAnnotations,
    pub(crate) children: Vec<String>,
    pub(crate) parent: Option<String>,
    pub(crate) moved: bool,
    pub(crate) dirty: bool,
    pub(crate) kind: NodeKind,
}

impl Node {
    /// Creates the root node.
    pub fn root() -> Self {
        Self {
            id: ROOT_ID.to_owned(),
            server_id: None,
            parent_id: None,
            sort: 0,
            version: None,
            text: String::new(),
            timestamps: NodeTimestamps::new(None),
            settings: NodeSettings::default(),
            annotations: NodeAnnotations::default(),
            children: Vec::new(),
            parent: None,
            moved: false,
            dirty: false,
            kind: NodeKind::Root,
        }
    }

    /// Creates a new local node. New nodes are dirty.
    pub fn new(node_type: NodeType, parent_id: Option<&str>, ids: &mut IdGenerator) -> Self {
        let kind = match node_type {
            NodeType::Note => NodeKind::Note(TopLevel::default()),
            NodeType::List => NodeKind::List(TopLevel::default()),
            NodeType::ListItem => NodeKind::ListItem(ListItemData::default()),
            NodeType::Blob => NodeKind::Blob(None),
        };
        Self {
            id: ids.node_id(),
            server_id: None,
            parent_id: parent_id.map(str::to_owned),
            sort: ids.sort_value(),
            version: None,
            text: String::new(),
            timestamps: NodeTimestamps::new(None),
            settings: NodeSettings::default(),
            annotations: NodeAnnotations::default(),
            children: Vec::new(),
            parent: None,
            moved: false,
            dirty: true,
            kind,
        }
    }

    /// Materializes a server record.
    ///
    /// Returns `Ok(None)` when the record's `type` is not recognized.
    pub fn from_json(raw: &Value, ids: &mut IdGenerator) -> ModelResult<Option<Self>> {
        let type_name = req_str(raw, "type")?;
        let Some(node_type) = NodeType::from_wire(&type_name) else {
            return Ok(None);
        };
        let mut node = Self::new(node_type, None, ids);
        node.load(raw)?;
        Ok(Some(node))
    }

    /// Local id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Server id, once the server has acknowledged the node.
    pub fn server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }

    /// Returns true if the server has not acknowledged the node yet.
    pub fn is_new(&self) -> bool {
        self.server_id.is_none()
    }

    /// Persisted parent id.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Id of the node this one is attached to.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Ids of attached children, in attach order.
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Sort key.
    pub fn sort(&self) -> i64 {
        self.sort
    }

    /// Server concurrency token.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Raw text of the node.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Timestamps.
    pub fn timestamps(&self) -> &NodeTimestamps {
        &self.timestamps
    }

    /// Settings.
    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    /// Settings for mutation.
    pub fn settings_mut(&mut self) -> &mut NodeSettings {
        &mut self.settings
    }

    /// Annotations.
    pub fn annotations(&self) -> &NodeAnnotations {
        &self.annotations
    }

    /// Annotations for mutation.
    pub fn annotations_mut(&mut self) -> &mut NodeAnnotations {
        &mut self.annotations
    }

    /// Returns true if the parent changed locally without a fresh version.
    pub fn moved(&self) -> bool {
        self.moved
    }

    /// Per-type payload.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Node type, `None` for the root.
    pub fn node_type(&self) -> Option<NodeType> {
        match self.kind {
            NodeKind::Root => None,
            NodeKind::Note(_) => Some(NodeType::Note),
            NodeKind::List(_) => Some(NodeType::List),
            NodeKind::ListItem(_) => Some(NodeType::ListItem),
            NodeKind::Blob(_) => Some(NodeType::Blob),
        }
    }

    /// Returns true for notes and lists.
    pub fn is_top_level(&self) -> bool {
        matches!(self.kind, NodeKind::Note(_) | NodeKind::List(_))
    }

    /// Note/list state.
    pub fn top_level(&self) -> Option<&TopLevel> {
        match &self.kind {
            NodeKind::Note(top) | NodeKind::List(top) => Some(top),
            _ => None,
        }
    }

    /// Note/list state for mutation.
    pub fn top_level_mut(&mut self) -> Option<&mut TopLevel> {
        match &mut self.kind {
            NodeKind::Note(top) | NodeKind::List(top) => Some(top),
            _ => None,
        }
    }

    /// List item state.
    pub fn list_item(&self) -> Option<&ListItemData> {
        match &self.kind {
            NodeKind::ListItem(item) => Some(item),
            _ => None,
        }
    }

    pub(crate) fn list_item_mut(&mut self) -> Option<&mut ListItemData> {
        match &mut self.kind {
            NodeKind::ListItem(item) => Some(item),
            _ => None,
        }
    }

    /// Attachment, for blob nodes.
    pub fn blob(&self) -> Option<&NodeBlob> {
        match &self.kind {
            NodeKind::Blob(blob) => blob.as_ref(),
            _ => None,
        }
    }

    /// Marks the node changed.
    pub fn touch(&mut self, edited: bool) {
        if matches!(self.kind, NodeKind::Root) {
            return;
        }
        self.dirty = true;
        self.timestamps.touch(edited);
    }

    pub(crate) fn mark_dirty(&mut self) {
        if !matches!(self.kind, NodeKind::Root) {
            self.dirty = true;
        }
    }

    /// Sets the raw text.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.touch(true);
    }

    /// Sets the sort key.
    pub fn set_sort(&mut self, sort: i64) {
        self.sort = sort;
        self.touch(false);
    }

    /// Sets the title of a note or list.
    pub fn set_title(&mut self, title: impl Into<String>) -> ModelResult<()> {
        self.top_level_field(|top| top.title = title.into())
    }

    /// Sets the color of a note or list.
    pub fn set_color(&mut self, color: ColorValue) -> ModelResult<()> {
        self.top_level_field(|top| top.color = color)
    }

    /// Archives or unarchives a note or list.
    pub fn set_archived(&mut self, archived: bool) -> ModelResult<()> {
        self.top_level_field(|top| top.archived = archived)
    }

    /// Pins or unpins a note or list.
    pub fn set_pinned(&mut self, pinned: bool) -> ModelResult<()> {
        self.top_level_field(|top| top.pinned = pinned)
    }

    /// Checks or unchecks a list item.
    pub fn set_checked(&mut self, checked: bool) -> ModelResult<()> {
        let id = self.id.clone();
        let item = self
            .list_item_mut()
            .ok_or_else(|| ModelError::invalid(format!("{id} is not a list item")))?;
        item.checked = checked;
        self.touch(true);
        Ok(())
    }

    /// Moves the node to the trash.
    pub fn trash(&mut self) {
        self.timestamps.trash();
        self.mark_dirty();
    }

    /// Restores the node from the trash.
    pub fn untrash(&mut self) {
        self.timestamps.untrash();
        self.mark_dirty();
    }

    /// Marks the node deleted.
    pub fn delete(&mut self) {
        self.timestamps.delete();
        self.mark_dirty();
    }

    /// Web URL of a note or list.
    pub fn url(&self) -> Option<String> {
        let node_type = self.node_type()?;
        if !self.is_top_level() {
            return None;
        }
        Some(format!(
            "https://keep.google.com/u/0/#{}/{}",
            node_type.as_str().to_lowercase(),
            self.server_id.as_deref().unwrap_or(&self.id)
        ))
    }

    fn top_level_field(&mut self, set: impl FnOnce(&mut TopLevel)) -> ModelResult<()> {
        let id = self.id.clone();
        let top = self
            .top_level_mut()
            .ok_or_else(|| ModelError::invalid(format!("{id} is not a note or list")))?;
        set(top);
        self.touch(true);
        Ok(())
    }
}

impl Element for Node {
    fn load(&mut self, raw: &Value) -> ModelResult<()> {
        object(raw, "node")?;
        let Some(expected) = self.node_type() else {
            return Err(ModelError::parse("the root node cannot be loaded", raw));
        };
        let type_name = req_str(raw, "type")?;
        if NodeType::from_wire(&type_name) != Some(expected) {
            return Err(ModelError::parse(
                format!("type mismatch: expected {}, got {type_name}", expected.as_str()),
                raw,
            ));
        }
        if raw.get("mergeConflict").is_some() {
            return Err(ModelError::Merge {
                node_id: self.id.clone(),
            });
        }
        if let Some(kind) = opt_str(raw, "kind") {
            if kind != NODE_KIND {
                warn!(node = %self.id, kind = %kind, "unknown node kind");
            }
        }

        self.id = req_str(raw, "id")?;
        if let Some(server_id) = opt_str(raw, "serverId") {
            self.server_id = Some(server_id);
        }
        self.parent_id = Some(req_str(raw, "parentId")?);
        if let Some(sort) = opt_i64(raw, "sortValue")? {
            self.sort = sort;
        }
        if let Some(version) = opt_token(raw, "baseVersion") {
            self.version = Some(version);
        }
        if let Some(text) = opt_str(raw, "text") {
            self.text = text;
        }
        self.timestamps.load(required(raw, "timestamps")?)?;
        if let Some(settings) = raw.get("nodeSettings").filter(|v| !v.is_null()) {
            self.settings.load(settings)?;
        }
        if let Some(annotations) = raw.get("annotationsGroup").filter(|v| !v.is_null()) {
            self.annotations.load(annotations)?;
        }
        self.moved = raw.get("moved").is_some();
        self.dirty = read_dirty(raw);

        match &mut self.kind {
            NodeKind::Note(top) | NodeKind::List(top) => top.load(raw)?,
            NodeKind::ListItem(item) => {
                item.prev_super_list_item_id = item.super_list_item_id.take();
                item.super_list_item_id =
                    opt_str(raw, "superListItemId").filter(|s| !s.is_empty());
                item.checked = opt_bool(raw, "checked").unwrap_or(false);
                if let Some(parent_server_id) = opt_str(raw, "parentServerId") {
                    item.parent_server_id = Some(parent_server_id);
                }
            }
            NodeKind::Blob(blob) => {
                *blob = match raw.get("blob") {
                    Some(b) if !b.is_null() => NodeBlob::from_json(b)?,
                    _ => None,
                };
            }
            NodeKind::Root => {}
        }
        Ok(())
    }

    fn save(&mut self, clean: bool) -> Value {
        let mut map = Map::new();
        map.insert("id".into(), Value::from(self.id.clone()));
        map.insert("kind".into(), Value::from(NODE_KIND));
        if let Some(node_type) = self.node_type() {
            map.insert("type".into(), Value::from(node_type.as_str()));
        }
        map.insert(
            "parentId".into(),
            self.parent_id.clone().map_or(Value::Null, Value::from),
        );
        map.insert("sortValue".into(), Value::from(self.sort));
        if !self.moved {
            if let Some(version) = &self.version {
                map.insert("baseVersion".into(), Value::from(version.clone()));
            }
        }
        map.insert("text".into(), Value::from(self.text.clone()));
        if let Some(server_id) = &self.server_id {
            map.insert("serverId".into(), Value::from(server_id.clone()));
        }
        map.insert("timestamps".into(), self.timestamps.save(clean));
        map.insert("nodeSettings".into(), self.settings.save(clean));
        map.insert("annotationsGroup".into(), self.annotations.save(clean));
        if self.moved && !clean {
            map.insert("moved".into(), Value::Bool(true));
        }

        match &mut self.kind {
            NodeKind::Note(top) | NodeKind::List(top) => top.save(&mut map, clean),
            NodeKind::ListItem(item) => {
                map.insert(
                    "parentServerId".into(),
                    item.parent_server_id.clone().map_or(Value::Null, Value::from),
                );
                map.insert(
                    "superListItemId".into(),
                    Value::from(item.super_list_item_id.clone().unwrap_or_default()),
                );
                map.insert("checked".into(), Value::from(item.checked));
            }
            NodeKind::Blob(Some(blob)) => {
                map.insert("blob".into(), blob.save(clean));
            }
            NodeKind::Blob(None) | NodeKind::Root => {}
        }
        finish_save(map, &mut self.dirty, clean)
    }

    fn dirty(&self) -> bool {
        if matches!(self.kind, NodeKind::Root) {
            return false;
        }
        self.dirty
            || self.timestamps.dirty()
            || self.settings.dirty()
            || self.annotations.dirty()
            || self.top_level().is_some_and(TopLevel::dirty)
    }
}
