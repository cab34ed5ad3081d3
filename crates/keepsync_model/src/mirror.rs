//! The local account mirror: node tree, labels and confirmed version.

use crate::element::Element;
use crate::error::{ModelError, ModelResult};
use crate::id::IdGenerator;
use crate::labels::{LabelApplyReport, LabelRegistry};
use crate::list::{ItemPlacement, SORT_DELTA};
use crate::node::{ColorValue, Node, NodeKind, NodeType, ROOT_ID};
use crate::snapshot::Snapshot;
use crate::store::{ApplyReport, NodeStore};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

/// Counts produced by [`Mirror::apply_page`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageApplyReport {
    /// Label counts, when the page carried a label list.
    pub labels: Option<LabelApplyReport>,
    /// Node counts.
    pub nodes: ApplyReport,
}

/// Filter for [`Mirror::find`].
#[derive(Debug, Clone)]
pub struct Query {
    /// Case-insensitive substring of the title or text.
    pub text: Option<String>,
    /// Pattern matched against the title or text.
    pub pattern: Option<Regex>,
    /// Match nodes carrying any of these label ids.
    pub labels: Vec<String>,
    /// Match nodes with any of these colors.
    pub colors: Vec<ColorValue>,
    /// Pinned state.
    pub pinned: Option<bool>,
    /// Archived state.
    pub archived: Option<bool>,
    /// Trashed state. Defaults to excluding trashed nodes.
    pub trashed: Option<bool>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            text: None,
            pattern: None,
            labels: Vec::new(),
            colors: Vec::new(),
            pinned: None,
            archived: None,
            trashed: Some(false),
        }
    }
}

impl Query {
    /// Creates a query matching every untrashed node.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters by substring.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Filters by pattern.
    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Filters by label id.
    pub fn with_label(mut self, label_id: impl Into<String>) -> Self {
        self.labels.push(label_id.into());
        self
    }

    /// Filters by color.
    pub fn with_color(mut self, color: ColorValue) -> Self {
        self.colors.push(color);
        self
    }

    /// Filters by pinned state.
    pub fn with_pinned(mut self, pinned: bool) -> Self {
        self.pinned = Some(pinned);
        self
    }

    /// Filters by archived state.
    pub fn with_archived(mut self, archived: bool) -> Self {
        self.archived = Some(archived);
        self
    }

    /// Filters by trashed state; `None` matches both.
    pub fn with_trashed(mut self, trashed: Option<bool>) -> Self {
        self.trashed = trashed;
        self
    }
}

/// The outgoing half of a sync exchange.
#[derive(Debug, Clone, Default)]
pub struct Outgoing {
    /// Clean saves of every dirty node.
    pub nodes: Vec<Value>,
    /// Ids of the nodes in `nodes`.
    pub node_ids: Vec<String>,
    /// The full label list, present only if some label was dirty.
    pub labels: Option<Vec<Value>>,
    /// Ids of the labels that were dirty.
    pub label_ids: Vec<String>,
}

impl Outgoing {
    /// Returns true if nothing needs sending.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.labels.is_none()
    }
}

/// Local state of an account.
#[derive(Debug, Clone)]
pub struct Mirror {
    store: NodeStore,
    labels: LabelRegistry,
    version: Option<String>,
}

impl Default for Mirror {
    fn default() -> Self {
        Self::new(IdGenerator::from_entropy())
    }
}

impl Mirror {
    /// Creates an empty mirror.
    pub fn new(ids: IdGenerator) -> Self {
        Self {
            store: NodeStore::new(ids),
            labels: LabelRegistry::new(),
            version: None,
        }
    }

    /// The node store.
    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    /// The node store for mutation.
    pub fn store_mut(&mut self) -> &mut NodeStore {
        &mut self.store
    }

    /// The label registry.
    pub fn labels(&self) -> &LabelRegistry {
        &self.labels
    }

    /// The label registry for mutation.
    pub fn labels_mut(&mut self) -> &mut LabelRegistry {
        &mut self.labels
    }

    /// Last confirmed server version.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Sets the confirmed server version.
    pub fn set_version(&mut self, version: Option<String>) {
        self.version = version;
    }

    /// Drops all nodes, labels and the version.
    pub fn clear(&mut self) {
        self.store.clear();
        self.labels = LabelRegistry::new();
        self.version = None;
    }

    /// Looks up a node by id or server id.
    pub fn get(&self, id: &str) -> Option<&Node> {
        self.store.get(id)
    }

    /// Top-level notes and lists.
    pub fn all(&self) -> Vec<&Node> {
        self.store.all()
    }

    /// Creates a note.
    pub fn create_note(&mut self, title: &str, text: &str) -> ModelResult<String> {
        let mut node = self.store.new_node(NodeType::Note, ROOT_ID);
        if !title.is_empty() {
            node.set_title(title)?;
        }
        let id = self.store.add(node)?;
        if !text.is_empty() {
            self.store.set_note_text(&id, text)?;
        }
        debug!(node = %id, "created note");
        Ok(id)
    }

    /// Creates a list with items in display order.
    pub fn create_list(&mut self, title: &str, items: &[(&str, bool)]) -> ModelResult<String> {
        let mut node = self.store.new_node(NodeType::List, ROOT_ID);
        if !title.is_empty() {
            node.set_title(title)?;
        }
        let id = self.store.add(node)?;
        let mut sort = self.store.ids_mut().sort_value();
        for (text, checked) in items {
            self.store
                .add_list_item(&id, text, *checked, Some(ItemPlacement::Sort(sort)))?;
            sort -= SORT_DELTA;
        }
        debug!(node = %id, items = items.len(), "created list");
        Ok(id)
    }

    /// Creates a label.
    pub fn create_label(&mut self, name: &str) -> ModelResult<String> {
        let label = self.labels.create(name, self.store.ids_mut())?;
        Ok(label.id().to_owned())
    }

    /// Finds a label by name, optionally creating it.
    pub fn find_label(&mut self, name: &str, create: bool) -> ModelResult<Option<String>> {
        if let Some(label) = self.labels.find(name) {
            return Ok(Some(label.id().to_owned()));
        }
        if create {
            return self.create_label(name).map(Some);
        }
        Ok(None)
    }

    /// Marks a label deleted and removes it from every node.
    pub fn delete_label(&mut self, label_id: &str) -> ModelResult<()> {
        let label = self.labels.get_mut(label_id).ok_or_else(|| ModelError::Label {
            message: format!("unknown label {label_id}"),
        })?;
        label.delete();
        let ids: Vec<String> = self.store.all().iter().map(|n| n.id().to_owned()).collect();
        for id in ids {
            if let Some(top) = self.store.get_mut(&id).and_then(Node::top_level_mut) {
                top.labels_mut().remove(label_id);
            }
        }
        Ok(())
    }

    /// Applies a label to a note or list.
    pub fn label_node(&mut self, node_id: &str, label_id: &str) -> ModelResult<()> {
        if self.labels.get(label_id).is_none() {
            return Err(ModelError::Label {
                message: format!("unknown label {label_id}"),
            });
        }
        self.top_level_mut(node_id)?.labels_mut().add(label_id);
        Ok(())
    }

    /// Removes a label from a note or list.
    pub fn unlabel_node(&mut self, node_id: &str, label_id: &str) -> ModelResult<()> {
        self.top_level_mut(node_id)?.labels_mut().remove(label_id);
        Ok(())
    }

    fn top_level_mut(&mut self, node_id: &str) -> ModelResult<&mut crate::node::TopLevel> {
        let node = self
            .store
            .get_mut(node_id)
            .ok_or_else(|| ModelError::not_found(node_id))?;
        let id = node.id().to_owned();
        node.top_level_mut()
            .ok_or_else(|| ModelError::invalid(format!("{id} is not a note or list")))
    }

    /// Display text of a note or list.
    pub fn text_of(&self, node_id: &str) -> ModelResult<String> {
        let node = self.store.node(node_id)?;
        match node.kind() {
            NodeKind::List(_) => self.store.list_text(node_id),
            NodeKind::Note(_) => self.store.note_text(node_id),
            _ => Ok(node.text().to_owned()),
        }
    }

    /// Top-level nodes matching `query`.
    pub fn find(&self, query: &Query) -> Vec<&Node> {
        let needle = query.text.as_ref().map(|t| t.to_lowercase());
        self.store
            .all()
            .into_iter()
            .filter(|node| {
                let Some(top) = node.top_level() else {
                    return false;
                };
                if needle.is_some() || query.pattern.is_some() {
                    let text = self.text_of(node.id()).unwrap_or_default();
                    if let Some(needle) = &needle {
                        if !top.title().to_lowercase().contains(needle)
                            && !text.to_lowercase().contains(needle)
                        {
                            return false;
                        }
                    }
                    if let Some(pattern) = &query.pattern {
                        if !pattern.is_match(top.title()) && !pattern.is_match(&text) {
                            return false;
                        }
                    }
                }
                (query.labels.is_empty() || query.labels.iter().any(|l| top.labels().contains(l)))
                    && (query.colors.is_empty() || query.colors.contains(&top.color()))
                    && query.pinned.map_or(true, |p| top.pinned() == p)
                    && query.archived.map_or(true, |a| top.archived() == a)
                    && query
                        .trashed
                        .map_or(true, |t| node.timestamps().is_trashed() == t)
            })
            .collect()
    }

    /// Collects the dirty entities to send and clears their dirty bits.
    ///
    /// Labels are included only when at least one of them is dirty.
    pub fn outgoing(&mut self) -> Outgoing {
        let (node_ids, nodes): (Vec<String>, Vec<Value>) = self.store.save_dirty().into_iter().unzip();
        let (labels, label_ids) = if self.labels.any_dirty() {
            let label_ids: Vec<String> = self
                .labels
                .all()
                .filter(|l| l.dirty())
                .map(|l| l.id().to_owned())
                .collect();
            (Some(self.labels.save_all(true)), label_ids)
        } else {
            (None, Vec::new())
        };
        Outgoing {
            nodes,
            node_ids,
            labels,
            label_ids,
        }
    }

    /// Restores the dirty bits of entities whose send failed.
    pub fn remark_dirty(&mut self, outgoing: &Outgoing) {
        self.store
            .remark_dirty(outgoing.node_ids.iter().map(String::as_str));
        self.labels
            .remark_dirty(outgoing.label_ids.iter().map(String::as_str));
    }

    /// Replaces the label registry with the full list sent by the server.
    pub fn apply_labels(&mut self, labels: &[Value]) -> ModelResult<LabelApplyReport> {
        let report = self.labels.apply(labels)?;
        self.store.resolve_labels(&self.labels);
        Ok(report)
    }

    /// Applies the node records of a delta.
    pub fn apply_nodes(&mut self, records: &[Value]) -> ModelResult<ApplyReport> {
        self.store.apply_nodes(records, &self.labels)
    }

    /// Applies one delta page: the optional label list, then the node records.
    ///
    /// The page is applied to a copy that replaces the mirror only once every
    /// part has been applied, so a failure leaves labels and nodes unchanged.
    pub fn apply_page(
        &mut self,
        labels: Option<&[Value]>,
        nodes: &[Value],
    ) -> ModelResult<PageApplyReport> {
        let mut registry = self.labels.clone();
        let mut store = self.store.clone();
        let labels = labels.map(|raw| registry.apply(raw)).transpose()?;
        let nodes = store.apply_nodes(nodes, &registry)?;
        self.labels = registry;
        self.store = store;
        Ok(PageApplyReport { labels, nodes })
    }

    /// Dumps the mirror, keeping dirty bits.
    pub fn dump(&mut self) -> Snapshot {
        let ids: Vec<String> = self.store.walk().iter().map(|n| n.id().to_owned()).collect();
        let nodes = ids
            .iter()
            .filter_map(|id| self.store.get_mut(id).map(|n| n.save(false)))
            .collect();
        Snapshot {
            keep_version: self.version.clone(),
            labels: self.labels.save_all(false),
            nodes,
        }
    }

    /// Replaces the mirror with a dumped snapshot.
    pub fn restore(&mut self, snapshot: &Snapshot) -> ModelResult<()> {
        self.clear();
        self.labels.apply(&snapshot.labels)?;
        self.store.apply_nodes(&snapshot.nodes, &self.labels)?;
        self.version = snapshot.keep_version.clone();
        info!(
            nodes = self.store.len() - 1,
            labels = self.labels.len(),
            "restored snapshot"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror() -> Mirror {
        Mirror::new(IdGenerator::seeded(31))
    }

    #[test]
    fn dirty_propagation_is_per_node() {
        let mut m = mirror();
        let a = m.create_note("a", "").unwrap();
        let b = m.create_note("b", "").unwrap();
        m.outgoing();
        assert!(m.store().find_dirty_nodes().is_empty());

        m.store_mut().get_mut(&a).unwrap().set_pinned(true).unwrap();
        let dirty: Vec<&str> = m.store().find_dirty_nodes().iter().map(|n| n.id()).collect();
        assert_eq!(dirty, vec![a.as_str()]);
        assert!(!m.get(&b).unwrap().dirty());
    }

    #[test]
    fn outgoing_skips_clean_labels() {
        let mut m = mirror();
        m.create_label("Work").unwrap();
        let out = m.outgoing();
        assert_eq!(out.labels.as_ref().map(Vec::len), Some(1));

        let out = m.outgoing();
        assert!(out.labels.is_none());
        assert!(out.is_empty());
    }

    #[test]
    fn remark_dirty_after_failed_send() {
        let mut m = mirror();
        let id = m.create_note("x", "y").unwrap();
        let label = m.create_label("L").unwrap();
        let out = m.outgoing();
        assert!(!out.node_ids.is_empty());
        assert!(!m.get(&id).unwrap().dirty());

        m.remark_dirty(&out);
        assert!(m.get(&id).unwrap().dirty());
        assert!(m.labels().get(&label).unwrap().dirty());
    }

    #[test]
    fn labels_on_nodes() {
        let mut m = mirror();
        let note = m.create_note("n", "").unwrap();
        let label = m.find_label("Home", true).unwrap().unwrap();
        assert_eq!(m.find_label("home", false).unwrap(), Some(label.clone()));
        m.label_node(&note, &label).unwrap();

        let found = m.find(&Query::new().with_label(label.clone()));
        assert_eq!(found.len(), 1);

        m.delete_label(&label).unwrap();
        assert!(m.find(&Query::new().with_label(label)).is_empty());
        assert!(m.label_node(&note, "tag.none").is_err());
    }

    #[test]
    fn find_by_text_pattern_and_flags() {
        let mut m = mirror();
        let a = m.create_note("Shopping", "eggs and milk").unwrap();
        let b = m.create_list("Packing", &[("socks", false), ("tent", true)]).unwrap();
        m.store_mut().get_mut(&b).unwrap().set_pinned(true).unwrap();

        assert_eq!(m.find(&Query::new().with_text("MILK"))[0].id(), a);
        assert_eq!(m.find(&Query::new().with_text("tent"))[0].id(), b);
        let pattern = Regex::new("^Pack").unwrap();
        assert_eq!(m.find(&Query::new().with_pattern(pattern)).len(), 1);
        assert_eq!(m.find(&Query::new().with_pinned(true))[0].id(), b);

        m.store_mut().get_mut(&a).unwrap().trash();
        assert_eq!(m.find(&Query::new()).len(), 1);
        assert_eq!(m.find(&Query::new().with_trashed(None)).len(), 2);
    }

    #[test]
    fn create_list_keeps_item_order() {
        let mut m = mirror();
        let list = m
            .create_list("Todo", &[("one", false), ("two", false), ("three", true)])
            .unwrap();
        assert_eq!(
            m.text_of(&list).unwrap(),
            "Todo\n☐ one\n☐ two\n☑ three"
        );
    }

    #[test]
    fn dump_restore_round_trip() {
        let mut m = mirror();
        let note = m.create_note("Note", "body").unwrap();
        let list = m
            .create_list("List", &[("a", false), ("b", false), ("c", false)])
            .unwrap();
        let items = m.store().list_items(&list).unwrap();
        m.store_mut().indent(&items[0], &items[1], true).unwrap();
        let label = m.create_label("L").unwrap();
        m.label_node(&note, &label).unwrap();
        m.set_version(Some("99".into()));

        let snapshot = m.dump();
        let encoded = snapshot.to_json().unwrap();

        let mut restored = mirror();
        restored.restore(&Snapshot::from_json(&encoded).unwrap()).unwrap();
        assert_eq!(restored.version(), Some("99"));
        assert_eq!(restored.text_of(&note).unwrap(), "body");
        assert_eq!(restored.text_of(&list).unwrap(), m.text_of(&list).unwrap());
        assert_eq!(restored.store().list_items(&list).unwrap(), items);
        assert!(restored.get(&note).unwrap().top_level().unwrap().labels().contains(&label));
        assert!(restored.get(&note).unwrap().dirty());
        assert!(restored.labels().any_dirty());
        assert!(restored.store().check_consistency().is_consistent());
    }

    #[test]
    fn removed_label_unlinks_nodes() {
        let mut m = mirror();
        let note = m.create_note("n", "").unwrap();
        let label = m.create_label("Gone").unwrap();
        m.label_node(&note, &label).unwrap();

        let report = m.apply_labels(&[]).unwrap();
        assert_eq!(report.removed, 1);
        assert!(m.labels().is_empty());
        let top = m.get(&note).unwrap().top_level().unwrap();
        assert!(!top.labels().contains(&label));
    }

    #[test]
    fn clear_resets_everything() {
        let mut m = mirror();
        m.create_note("x", "").unwrap();
        m.create_label("y").unwrap();
        m.set_version(Some("1".into()));
        m.clear();
        assert!(m.store().is_empty());
        assert!(m.labels().is_empty());
        assert_eq!(m.version(), None);
    }

    #[test]
    fn apply_page_is_all_or_nothing() {
        let mut m = mirror();
        let note = m.create_note("local", "").unwrap();
        let label = serde_json::json!({
            "mainId": "tag.new",
            "name": "New",
            "timestamps": {
                "created": "2020-01-01T00:00:00.000Z",
                "updated": "2020-01-01T00:00:00.000Z"
            }
        });
        let nameless = serde_json::json!({"type": "NOTE", "parentId": ROOT_ID});

        let result = m.apply_page(Some(std::slice::from_ref(&label)), &[nameless]);
        assert!(result.is_err());
        assert!(m.labels().is_empty());
        assert_eq!(m.all().len(), 1);

        let report = m.apply_page(Some(&[label][..]), &[]).unwrap();
        assert_eq!(report.labels.map(|l| l.created), Some(1));
        assert_eq!(report.nodes, ApplyReport::default());
        assert!(m.labels().get("tag.new").is_some());
        assert!(m.get(&note).is_some());
    }
}
