//! The node arena.
//!
//! [`NodeStore`] owns every node by id. Parent/child and list nesting
//! relations are id references resolved through the store, so detaching
//! or unregistering a node never leaves a dangling pointer behind.
//!
//! ## Invariants
//!
//! - Every node reachable from the root is registered.
//! - An attached node's `parent_id` equals the id of the node it is
//!   attached to, and that node lists it among its children.
//! - A nested item's parent item lists it among its subitems.

use crate::element::Element;
use crate::error::{ModelError, ModelResult};
use crate::fields::{opt_str, req_str};
use crate::id::IdGenerator;
use crate::labels::LabelRegistry;
use crate::node::{Node, NodeKind, NodeType, ROOT_ID};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Counts produced by [`NodeStore::apply_nodes`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Nodes materialized from the delta.
    pub created: usize,
    /// Known nodes updated in place.
    pub updated: usize,
    /// Nodes unregistered by tombstones, descendants included.
    pub deleted: usize,
    /// Records discarded (unknown type or failed load).
    pub discarded: usize,
    /// Local ids of nodes the server reported a merge conflict for.
    pub merge_conflicts: Vec<String>,
}

/// Result of [`NodeStore::check_consistency`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Ids reachable from the root but not registered.
    pub unregistered: Vec<String>,
    /// Registered ids not reachable from the root.
    pub unreachable: Vec<String>,
    /// Ids whose parent or nesting links are not mirrored on the other side.
    pub broken_links: Vec<String>,
}

impl ConsistencyReport {
    /// Returns true if no violations were found.
    pub fn is_consistent(&self) -> bool {
        self.unregistered.is_empty() && self.unreachable.is_empty() && self.broken_links.is_empty()
    }
}

/// A list nesting transition carried by a delta record.
#[derive(Debug, Clone)]
struct NestingMove {
    item: String,
    prev_super: Option<String>,
    super_item: Option<String>,
}

/// Authoritative map from id to node plus the server-id alias map.
#[derive(Debug, Clone)]
pub struct NodeStore {
    nodes: BTreeMap<String, Node>,
    aliases: HashMap<String, String>,
    ids: IdGenerator,
}

impl NodeStore {
    /// Creates a store holding only the root.
    pub fn new(ids: IdGenerator) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT_ID.to_owned(), Node::root());
        Self {
            nodes,
            aliases: HashMap::new(),
            ids,
        }
    }

    /// Drops every node except a fresh root.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.nodes.insert(ROOT_ID.to_owned(), Node::root());
        self.aliases.clear();
    }

    /// The id generator.
    pub fn ids_mut(&mut self) -> &mut IdGenerator {
        &mut self.ids
    }

    /// Number of registered nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if only the root is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// The root node.
    pub fn root(&self) -> &Node {
        &self.nodes[ROOT_ID]
    }

    /// Resolves an id or server id to a local id.
    pub fn resolve_id(&self, id: &str) -> Option<&str> {
        if let Some((key, _)) = self.nodes.get_key_value(id) {
            return Some(key.as_str());
        }
        self.aliases.get(id).map(String::as_str)
    }

    /// Looks up a node by local id, then by server id.
    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes
            .get(id)
            .or_else(|| self.aliases.get(id).and_then(|local| self.nodes.get(local)))
    }

    /// Looks up a node for mutation.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Node> {
        let local = self.resolve_id(id)?.to_owned();
        self.nodes.get_mut(&local)
    }

    pub(crate) fn node(&self, id: &str) -> ModelResult<&Node> {
        self.get(id).ok_or_else(|| ModelError::not_found(id))
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> ModelResult<&mut Node> {
        self.get_mut(id).ok_or_else(|| ModelError::not_found(id))
    }

    /// Returns true if `id` resolves to a registered node.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Creates an unregistered node owned by `parent_id`.
    pub fn new_node(&mut self, node_type: NodeType, parent_id: &str) -> Node {
        Node::new(node_type, Some(parent_id), &mut self.ids)
    }

    fn register(&mut self, node: Node) -> String {
        let id = node.id.clone();
        if let Some(server_id) = &node.server_id {
            self.aliases.insert(server_id.clone(), id.clone());
        }
        self.nodes.insert(id.clone(), node);
        id
    }

    /// Registers a top-level node under the root.
    ///
    /// The node must name the root as its parent. The attach step does not
    /// mark the root dirty.
    pub fn add(&mut self, node: Node) -> ModelResult<String> {
        if node.parent_id.as_deref() != Some(ROOT_ID) {
            return Err(ModelError::invalid(format!(
                "node {} must have parent {ROOT_ID}, has {:?}",
                node.id, node.parent_id
            )));
        }
        let id = self.register(node);
        self.attach(ROOT_ID, &id, false)?;
        Ok(id)
    }

    /// Registers a node and attaches it to `parent`, marking the parent dirty.
    pub fn insert_child(&mut self, parent: &str, node: Node) -> ModelResult<String> {
        let parent = self.node(parent)?.id.clone();
        let id = self.register(node);
        self.attach(&parent, &id, true)?;
        Ok(id)
    }

    /// Attaches `child` to `parent`, detaching it from any previous parent.
    pub fn attach(&mut self, parent: &str, child: &str, dirty: bool) -> ModelResult<()> {
        let parent = self.node(parent)?.id.clone();
        let child = self.node(child)?.id.clone();
        if parent == child {
            return Err(ModelError::invalid(format!("{child} cannot own itself")));
        }

        if let Some(previous) = self.nodes[&child].parent.clone() {
            if previous != parent {
                self.detach(&previous, &child, false)?;
            }
        }

        let parent_node = self.node_mut(&parent)?;
        if !parent_node.children.contains(&child) {
            parent_node.children.push(child.clone());
        }
        let parent_server_id = parent_node.server_id.clone();
        if dirty {
            parent_node.touch(false);
        }

        let child_node = self.node_mut(&child)?;
        child_node.parent = Some(parent.clone());
        child_node.parent_id = Some(parent);
        if let (Some(item), Some(server_id)) = (child_node.list_item_mut(), parent_server_id) {
            item.parent_server_id = Some(server_id);
        }
        Ok(())
    }

    /// Detaches `child` from `parent`. A no-op if it is not attached there.
    pub fn detach(&mut self, parent: &str, child: &str, dirty: bool) -> ModelResult<()> {
        let parent = self.node(parent)?.id.clone();
        let parent_node = self.node_mut(&parent)?;
        let before = parent_node.children.len();
        parent_node.children.retain(|c| c != child);
        if parent_node.children.len() == before {
            return Ok(());
        }
        if dirty {
            parent_node.touch(false);
        }
        if let Some(child_node) = self.get_mut(child) {
            child_node.parent = None;
        }
        Ok(())
    }

    /// Moves a node to a new parent locally.
    ///
    /// The node is flagged `moved` so its stale version is not sent.
    pub fn reparent(&mut self, id: &str, new_parent: &str) -> ModelResult<()> {
        let id = self.node(id)?.id.clone();
        if id == ROOT_ID {
            return Err(ModelError::invalid("the root cannot be moved"));
        }
        if let Some(previous) = self.nodes[&id].parent.clone() {
            self.detach(&previous, &id, true)?;
        }
        self.attach(new_parent, &id, true)?;
        let node = self.node_mut(&id)?;
        node.moved = true;
        node.touch(false);
        Ok(())
    }

    /// Removes a node and its descendants from the store.
    ///
    /// Server-id aliases and list nesting links are cleaned up. Returns the
    /// number of nodes unregistered.
    pub fn unregister(&mut self, id: &str) -> ModelResult<usize> {
        let id = self.node(id)?.id.clone();
        if id == ROOT_ID {
            return Err(ModelError::invalid("the root cannot be removed"));
        }
        if let Some(parent) = self.nodes[&id].parent.clone() {
            self.detach(&parent, &id, false)?;
        }

        let mut removed = 0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.remove(&current) else {
                continue;
            };
            removed += 1;
            if let Some(server_id) = &node.server_id {
                if self.aliases.get(server_id) == Some(&current) {
                    self.aliases.remove(server_id);
                }
            }
            if let Some(item) = node.list_item() {
                if let Some(parent_item) = &item.parent_item {
                    if let Some(parent) = self.nodes.get_mut(parent_item).and_then(Node::list_item_mut) {
                        parent.subitems.retain(|s| s != &current);
                    }
                }
                for sub in &item.subitems {
                    if let Some(sub) = self.nodes.get_mut(sub).and_then(Node::list_item_mut) {
                        sub.parent_item = None;
                        sub.super_list_item_id = None;
                    }
                }
            }
            stack.extend(node.children.iter().cloned());
            debug!(node = %current, "unregistered node");
        }
        Ok(removed)
    }

    /// All registered nodes with unsent changes.
    ///
    /// Registered but unreachable nodes are included.
    pub fn find_dirty_nodes(&self) -> Vec<&Node> {
        self.nodes.values().filter(|n| n.dirty()).collect()
    }

    /// Clean-saves every dirty node, returning the ids and snapshots.
    pub fn save_dirty(&mut self) -> Vec<(String, Value)> {
        self.nodes
            .values_mut()
            .filter(|n| n.dirty())
            .map(|n| (n.id.clone(), n.save(true)))
            .collect()
    }

    /// Marks the given nodes dirty again.
    pub fn remark_dirty<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        for id in ids {
            if let Some(node) = self.get_mut(id) {
                node.mark_dirty();
            }
        }
    }

    /// Top-level notes and lists, in storage order.
    pub fn all(&self) -> Vec<&Node> {
        self.root()
            .children
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|n| n.is_top_level())
            .collect()
    }

    /// Every registered node other than the root, parents before children.
    pub fn walk(&self) -> Vec<&Node> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut seen = BTreeSet::new();
        let mut queue = std::collections::VecDeque::from([ROOT_ID.to_owned()]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                if id != ROOT_ID {
                    out.push(node);
                }
                queue.extend(node.children.iter().cloned());
            }
        }
        out.extend(
            self.nodes
                .values()
                .filter(|n| !seen.contains(&n.id) && n.id != ROOT_ID),
        );
        out
    }

    /// Blob children of a node.
    pub fn blobs(&self, id: &str) -> Vec<&Node> {
        self.children_of(id)
            .into_iter()
            .filter(|n| matches!(n.kind, NodeKind::Blob(_)))
            .collect()
    }

    pub(crate) fn children_of(&self, id: &str) -> Vec<&Node> {
        self.get(id)
            .map(|n| {
                n.children
                    .iter()
                    .filter_map(|c| self.nodes.get(c))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Verifies that registered and reachable ids agree and that parent and
    /// nesting links point both ways. Violations are logged.
    pub fn check_consistency(&self) -> ConsistencyReport {
        let mut report = ConsistencyReport::default();
        let mut reachable = BTreeSet::new();
        let mut stack = vec![ROOT_ID.to_owned()];
        while let Some(id) = stack.pop() {
            if !reachable.insert(id.clone()) {
                continue;
            }
            match self.nodes.get(&id) {
                Some(node) => stack.extend(node.children.iter().cloned()),
                None => {
                    warn!(node = %id, "reachable node is not registered");
                    report.unregistered.push(id);
                }
            }
        }
        for id in self.nodes.keys() {
            if !reachable.contains(id) {
                warn!(node = %id, "registered node is not reachable");
                report.unreachable.push(id.clone());
            }
        }
        for (id, node) in &self.nodes {
            if !self.links_agree(id, node) {
                warn!(node = %id, "node links are not mirrored");
                report.broken_links.push(id.clone());
            }
        }
        report
    }

    fn links_agree(&self, id: &str, node: &Node) -> bool {
        let parent_ok = node.parent.as_deref().map_or(true, |p| {
            node.parent_id.as_deref() == Some(p)
                && self
                    .nodes
                    .get(p)
                    .is_some_and(|parent| parent.children.iter().any(|c| c == id))
        });
        let children_ok = node.children.iter().all(|c| {
            self.nodes
                .get(c)
                .map_or(true, |child| child.parent.as_deref() == Some(id))
        });
        let nesting_ok = node.list_item().map_or(true, |item| {
            let up = item.parent_item.as_deref().map_or(true, |p| {
                self.nodes
                    .get(p)
                    .and_then(Node::list_item)
                    .is_some_and(|parent| parent.subitems.iter().any(|s| s == id))
            });
            let down = item.subitems.iter().all(|s| {
                self.nodes
                    .get(s)
                    .and_then(Node::list_item)
                    .is_some_and(|sub| sub.parent_item.as_deref() == Some(id))
            });
            up && down
        });
        parent_ok && children_ok && nesting_ok
    }

    /// Text of a note, delegated to its text item when it owns exactly one.
    pub fn note_text(&self, id: &str) -> ModelResult<String> {
        let node = self.node(id)?;
        let items = self.text_items(node);
        Ok(match items.as_slice() {
            [item] => item.text.clone(),
            _ => node.text.clone(),
        })
    }

    /// Sets the text of a note, creating its text item when missing.
    pub fn set_note_text(&mut self, id: &str, text: &str) -> ModelResult<()> {
        let node = self.node(id)?;
        if !matches!(node.kind, NodeKind::Note(_)) {
            return Err(ModelError::invalid(format!("{} is not a note", node.id)));
        }
        let note_id = node.id.clone();
        let items: Vec<String> = self.text_items(node).iter().map(|n| n.id.clone()).collect();
        match items.as_slice() {
            [item] => self.node_mut(item)?.set_text(text),
            [] => {
                let mut item = self.new_node(NodeType::ListItem, &note_id);
                item.set_text(text);
                self.insert_child(&note_id, item)?;
            }
            _ => self.node_mut(&note_id)?.set_text(text),
        }
        self.node_mut(&note_id)?.touch(true);
        Ok(())
    }

    fn text_items<'a>(&'a self, node: &'a Node) -> Vec<&'a Node> {
        node.children
            .iter()
            .filter_map(|c| self.nodes.get(c))
            .filter(|c| matches!(c.kind, NodeKind::ListItem(_)))
            .collect()
    }

    /// Applies the node records of a server delta.
    ///
    /// Every record must carry a string `id`; otherwise nothing is applied.
    /// Per-record load failures are logged and the record discarded. Merge
    /// conflicts leave the node in its last-known-good state and are listed
    /// in the report.
    pub fn apply_nodes(
        &mut self,
        records: &[Value],
        labels: &LabelRegistry,
    ) -> ModelResult<ApplyReport> {
        for raw in records {
            req_str(raw, "id")?;
        }

        let mut report = ApplyReport::default();
        let mut created = Vec::new();
        let mut updated = Vec::new();
        let mut tombstones = Vec::new();
        let mut moves = Vec::new();

        for raw in records {
            let record_id = req_str(raw, "id")?;
            let has_parent = raw.get("parentId").is_some_and(|p| !p.is_null());
            let known = self.resolve_id(&record_id).map(str::to_owned);

            match (known, has_parent) {
                (Some(local), true) => {
                    let mut copy = self.nodes[&local].clone();
                    match copy.load(raw) {
                        Ok(()) => {
                            // Records matched by server id carry the server's id.
                            copy.id = local.clone();
                            if let Some(server_id) = &copy.server_id {
                                self.aliases.insert(server_id.clone(), local.clone());
                            }
                            moves.extend(nesting_move(raw, &copy));
                            self.nodes.insert(local.clone(), copy);
                            updated.push(local.clone());
                            report.updated += 1;
                            debug!(node = %local, "updated node");
                        }
                        Err(ModelError::Merge { node_id }) => {
                            warn!(node = %node_id, "merge conflict");
                            report.merge_conflicts.push(node_id);
                        }
                        Err(e) if e.is_entity_local() => {
                            warn!(node = %local, error = %e, "discarding node update");
                            report.discarded += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
                (Some(local), false) => tombstones.push(local),
                (None, true) => match Node::from_json(raw, &mut self.ids) {
                    Ok(Some(node)) => {
                        moves.extend(nesting_move(raw, &node));
                        let id = self.register(node);
                        debug!(node = %id, "created node");
                        created.push(id);
                        report.created += 1;
                    }
                    Ok(None) => {
                        warn!(
                            node = %record_id,
                            node_type = ?opt_str(raw, "type"),
                            "discarding node of unknown type"
                        );
                        report.discarded += 1;
                    }
                    Err(e) if e.is_entity_local() => {
                        warn!(node = %record_id, error = %e, "discarding new node");
                        report.discarded += 1;
                    }
                    Err(e) => return Err(e),
                },
                (None, false) => {
                    debug!(node = %record_id, "tombstone for unknown node");
                }
            }
        }

        for id in created.iter().chain(updated.iter()) {
            self.attach_to_recorded_parent(id)?;
        }

        self.apply_nesting(moves);

        for id in tombstones {
            if self.contains(&id) {
                report.deleted += self.unregister(&id)?;
            }
        }

        self.resolve_labels(labels);

        info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            discarded = report.discarded,
            "applied nodes"
        );
        Ok(report)
    }

    fn attach_to_recorded_parent(&mut self, id: &str) -> ModelResult<()> {
        let Some(node) = self.nodes.get(id) else {
            return Ok(());
        };
        let Some(parent_id) = node.parent_id.clone() else {
            return Ok(());
        };
        let current = node.parent.clone();
        let Some(parent) = self.resolve_id(&parent_id).map(str::to_owned) else {
            if let Some(previous) = current {
                self.detach(&previous, id, false)?;
            }
            warn!(node = %id, parent = %parent_id, "parent not registered; node left detached");
            return Ok(());
        };
        if current.as_deref() == Some(parent.as_str()) {
            if let Some(node) = self.nodes.get_mut(id) {
                node.parent_id = Some(parent);
            }
        } else {
            self.attach(&parent, id, false)?;
            debug!(node = %id, parent = %parent, "attached node");
        }
        Ok(())
    }

    /// Applies nesting moves in two phases: every dedent first, then every
    /// indent, so the outcome does not depend on record order.
    fn apply_nesting(&mut self, steps: Vec<NestingMove>) {
        let mut indents = Vec::new();
        for step in steps {
            let Some(item) = self.resolve_id(&step.item).map(str::to_owned) else {
                continue;
            };
            let target = step
                .super_item
                .as_deref()
                .and_then(|s| self.resolve_id(s))
                .map(str::to_owned);
            let current = self
                .nodes
                .get(&item)
                .and_then(Node::list_item)
                .and_then(|d| d.parent_item.clone());

            let mut stale: Vec<String> = current.into_iter().collect();
            if let Some(prev) = step.prev_super.as_deref().and_then(|p| self.resolve_id(p)) {
                if !stale.iter().any(|s| s == prev) {
                    stale.push(prev.to_owned());
                }
            }
            for old in stale {
                if target.as_deref() != Some(old.as_str()) {
                    if let Err(e) = self.dedent(&old, &item, false) {
                        warn!(item = %item, parent = %old, error = %e, "dedent failed");
                    }
                }
            }

            match target {
                Some(target) => indents.push((target, item)),
                None if step.super_item.is_some() => {
                    warn!(item = %item, "super item not registered");
                }
                None => {}
            }
        }

        for (target, item) in indents {
            if let Err(e) = self.indent(&target, &item, false) {
                warn!(item = %item, parent = %target, error = %e, "indent failed");
            }
        }
    }

    /// Turns links to labels unknown to `labels` into tombstones.
    pub(crate) fn resolve_labels(&mut self, labels: &LabelRegistry) {
        let top_level: Vec<String> = self
            .root()
            .children
            .iter()
            .filter(|id| self.nodes.get(*id).is_some_and(Node::is_top_level))
            .cloned()
            .collect();
        for id in top_level {
            if let Some(top) = self.nodes.get_mut(&id).and_then(Node::top_level_mut) {
                top.labels.resolve(labels);
            }
        }
    }
}

fn nesting_move(raw: &Value, node: &Node) -> Option<NestingMove> {
    let item = node.list_item()?;
    if let Some(sub) = raw.get("listItem").filter(|v| v.is_object()) {
        return Some(NestingMove {
            item: opt_str(sub, "id").unwrap_or_else(|| node.id.clone()),
            prev_super: opt_str(sub, "prevSuperListItemId").filter(|s| !s.is_empty()),
            super_item: opt_str(sub, "superListItemId").filter(|s| !s.is_empty()),
        });
    }
    Some(NestingMove {
        item: node.id.clone(),
        prev_super: item.prev_super_list_item_id.clone(),
        super_item: item.super_list_item_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn ts() -> Value {
        json!({"created": "2020-01-01T00:00:00.000Z", "updated": "2020-01-01T00:00:00.000Z"})
    }

    fn record(id: &str, node_type: &str, parent: &str) -> Value {
        json!({
            "id": id, "kind": "notes#node", "type": node_type, "parentId": parent,
            "serverId": format!("srv-{id}"), "baseVersion": "1", "text": "",
            "timestamps": ts()
        })
    }

    fn store() -> NodeStore {
        NodeStore::new(IdGenerator::seeded(11))
    }

    #[test]
    fn add_requires_root_parent() {
        let mut store = store();
        let note = store.new_node(NodeType::Note, "elsewhere");
        assert!(matches!(
            store.add(note),
            Err(ModelError::InvalidArgument { .. })
        ));

        let note = store.new_node(NodeType::Note, ROOT_ID);
        let id = store.add(note).unwrap();
        assert_eq!(store.all().len(), 1);
        assert_eq!(store.get(&id).unwrap().parent(), Some(ROOT_ID));
        assert!(!store.root().dirty());
    }

    #[test]
    fn dirty_nodes_include_unreachable() {
        let mut store = store();
        let note = store.new_node(NodeType::Note, ROOT_ID);
        let id = store.add(note).unwrap();
        for (_, _) in store.save_dirty() {}
        assert!(store.find_dirty_nodes().is_empty());

        let orphan = store.new_node(NodeType::ListItem, "missing");
        let orphan_id = store.register(orphan);
        let dirty: Vec<&str> = store.find_dirty_nodes().iter().map(|n| n.id()).collect();
        assert_eq!(dirty, vec![orphan_id.as_str()]);

        let report = store.check_consistency();
        assert_eq!(report.unreachable, vec![orphan_id]);
        assert!(store.get(&id).is_some());
    }

    #[test]
    fn apply_creates_and_attaches_out_of_order() {
        let mut store = store();
        let labels = LabelRegistry::new();
        let records = vec![
            record("i1", "LIST_ITEM", "l1"),
            record("l1", "LIST", ROOT_ID),
        ];
        let report = store.apply_nodes(&records, &labels).unwrap();
        assert_eq!(report.created, 2);

        let list = store.get("l1").unwrap();
        assert_eq!(list.children(), ["i1".to_owned()]);
        assert_eq!(store.get("srv-i1").unwrap().id(), "i1");
        assert!(store.check_consistency().is_consistent());
    }

    #[test]
    fn apply_rejects_batch_without_ids() {
        let mut store = store();
        let labels = LabelRegistry::new();
        let records = vec![record("l1", "LIST", ROOT_ID), json!({"type": "NOTE"})];
        assert!(store.apply_nodes(&records, &labels).is_err());
        assert!(store.get("l1").is_none());
    }

    #[test]
    fn tombstone_removes_node_and_alias() {
        let mut store = store();
        let labels = LabelRegistry::new();
        store
            .apply_nodes(
                &[record("l1", "LIST", ROOT_ID), record("i1", "LIST_ITEM", "l1")],
                &labels,
            )
            .unwrap();

        let report = store
            .apply_nodes(&[json!({"id": "l1", "type": "LIST"})], &labels)
            .unwrap();
        assert_eq!(report.deleted, 2);
        assert!(store.get("l1").is_none());
        assert!(store.get("srv-l1").is_none());
        assert!(store.get("i1").is_none());
        assert!(store.root().children().is_empty());
    }

    #[test]
    fn unknown_type_and_bad_records_are_discarded() {
        let mut store = store();
        let labels = LabelRegistry::new();
        let mut bad = record("n2", "NOTE", ROOT_ID);
        bad["timestamps"] = json!({"created": "never"});
        let report = store
            .apply_nodes(
                &[record("r1", "REMINDER", ROOT_ID), bad, record("n1", "NOTE", ROOT_ID)],
                &labels,
            )
            .unwrap();
        assert_eq!(report.discarded, 2);
        assert_eq!(report.created, 1);
    }

    #[test]
    fn merge_conflict_keeps_last_known_good() {
        let mut store = store();
        let labels = LabelRegistry::new();
        let mut note = record("n1", "NOTE", ROOT_ID);
        note["title"] = json!("before");
        store.apply_nodes(&[note.clone()], &labels).unwrap();

        note["title"] = json!("after");
        note["mergeConflict"] = json!(true);
        let report = store.apply_nodes(&[note], &labels).unwrap();
        assert_eq!(report.merge_conflicts, vec!["n1".to_owned()]);
        assert_eq!(store.get("n1").unwrap().top_level().unwrap().title(), "before");
    }

    #[test]
    fn server_move_reattaches() {
        let mut store = store();
        let labels = LabelRegistry::new();
        store
            .apply_nodes(
                &[
                    record("l1", "LIST", ROOT_ID),
                    record("l2", "LIST", ROOT_ID),
                    record("i1", "LIST_ITEM", "l1"),
                ],
                &labels,
            )
            .unwrap();
        store
            .apply_nodes(&[record("i1", "LIST_ITEM", "l2")], &labels)
            .unwrap();
        assert!(store.get("l1").unwrap().children().is_empty());
        assert_eq!(store.get("l2").unwrap().children(), ["i1".to_owned()]);
        assert!(store.check_consistency().is_consistent());
    }

    #[test]
    fn note_text_delegates_to_single_item() {
        let mut store = store();
        let note = store.new_node(NodeType::Note, ROOT_ID);
        let id = store.add(note).unwrap();
        store.set_note_text(&id, "hello").unwrap();
        assert_eq!(store.note_text(&id).unwrap(), "hello");
        assert_eq!(store.get(&id).unwrap().children().len(), 1);
        assert_eq!(store.get(&id).unwrap().text(), "");

        store.set_note_text(&id, "again").unwrap();
        assert_eq!(store.get(&id).unwrap().children().len(), 1);
        assert_eq!(store.note_text(&id).unwrap(), "again");
    }

    #[test]
    fn reparent_sets_moved() {
        let mut store = store();
        let a = store.new_node(NodeType::List, ROOT_ID);
        let a = store.add(a).unwrap();
        let b = store.new_node(NodeType::List, ROOT_ID);
        let b = store.add(b).unwrap();
        let item = store.new_node(NodeType::ListItem, &a);
        let item = store.insert_child(&a, item).unwrap();

        store.reparent(&item, &b).unwrap();
        let node = store.get(&item).unwrap();
        assert!(node.moved());
        assert_eq!(node.parent_id(), Some(b.as_str()));
        assert!(store.get(&a).unwrap().children().is_empty());
    }

    fn item(id: &str, list: &str, super_item: &str) -> Value {
        let mut raw = record(id, "LIST_ITEM", list);
        raw["superListItemId"] = json!(super_item);
        raw
    }

    fn nested_list() -> NodeStore {
        let mut store = store();
        store
            .apply_nodes(
                &[
                    record("l1", "LIST", ROOT_ID),
                    item("x", "l1", ""),
                    item("y", "l1", "z"),
                    item("z", "l1", ""),
                ],
                &LabelRegistry::new(),
            )
            .unwrap();
        assert_eq!(store.get("y").unwrap().list_item().unwrap().parent_item(), Some("z"));
        store
    }

    #[test]
    fn nesting_batch_is_order_independent() {
        let labels = LabelRegistry::new();
        let batch = [item("x", "l1", "y"), item("y", "l1", "")];

        let mut forward = nested_list();
        forward.apply_nodes(&batch, &labels).unwrap();
        let mut reversed = nested_list();
        let mut flipped = batch.to_vec();
        flipped.reverse();
        reversed.apply_nodes(&flipped, &labels).unwrap();

        for store in [&forward, &reversed] {
            let x = store.get("x").unwrap().list_item().unwrap();
            let y = store.get("y").unwrap().list_item().unwrap();
            assert_eq!(x.parent_item(), Some("y"));
            assert_eq!(x.super_list_item_id(), Some("y"));
            assert_eq!(y.parent_item(), None);
            assert_eq!(y.subitems(), ["x".to_owned()]);
            assert!(store.get("z").unwrap().list_item().unwrap().subitems().is_empty());
            assert!(store.check_consistency().is_consistent());
        }
        assert_eq!(forward.list_items("l1").unwrap(), reversed.list_items("l1").unwrap());
    }

    #[test]
    fn update_by_server_id_keeps_local_id() {
        let mut store = store();
        let labels = LabelRegistry::new();
        store.apply_nodes(&[record("n1", "NOTE", ROOT_ID)], &labels).unwrap();

        let mut update = record("n1", "NOTE", ROOT_ID);
        update["id"] = json!("srv-n1");
        update["title"] = json!("renamed");
        let report = store.apply_nodes(&[update], &labels).unwrap();
        assert_eq!(report.updated, 1);

        let node = store.get_mut("n1").unwrap();
        assert_eq!(node.id(), "n1");
        assert_eq!(node.top_level().unwrap().title(), "renamed");
        assert_eq!(node.save(true)["id"], json!("n1"));
        assert_eq!(store.get("srv-n1").unwrap().id(), "n1");
        assert_eq!(store.root().children(), ["n1".to_owned()]);
    }

    #[test]
    fn removed_parent_item_clears_subitem_links() {
        let mut store = nested_list();
        let report = store
            .apply_nodes(&[json!({"id": "z", "type": "LIST_ITEM"})], &LabelRegistry::new())
            .unwrap();
        assert_eq!(report.deleted, 1);

        let y = store.get("y").unwrap().list_item().unwrap();
        assert_eq!(y.parent_item(), None);
        assert_eq!(y.super_list_item_id(), None);
        assert!(store.check_consistency().is_consistent());
    }

    #[test]
    fn consistency_flags_one_sided_links() {
        let mut store = nested_list();
        if let Some(z) = store.nodes.get_mut("z").and_then(Node::list_item_mut) {
            z.subitems.clear();
        }
        store.nodes.get_mut("l1").unwrap().children.retain(|c| c != "x");

        let report = store.check_consistency();
        assert_eq!(report.unreachable, vec!["x".to_owned()]);
        assert_eq!(report.broken_links, vec!["x".to_owned(), "y".to_owned()]);
    }

    fn delta_record() -> impl Strategy<Value = Value> {
        prop_oneof![
            (0..3usize).prop_map(|l| record(&format!("l{l}"), "LIST", ROOT_ID)),
            (0..6usize, 0..3usize, prop::option::of(0..6usize)).prop_map(|(i, l, sup)| {
                let sup = sup.map(|s| format!("i{s}")).unwrap_or_default();
                item(&format!("i{i}"), &format!("l{l}"), &sup)
            }),
            (0..6usize).prop_map(|i| json!({"id": format!("i{i}"), "type": "LIST_ITEM"})),
            (0..3usize).prop_map(|l| json!({"id": format!("l{l}"), "type": "LIST"})),
        ]
    }

    proptest! {
        #[test]
        fn applied_batches_keep_links_mirrored(
            batches in prop::collection::vec(prop::collection::vec(delta_record(), 0..8), 1..5),
        ) {
            let mut store = store();
            let labels = LabelRegistry::new();
            for batch in &batches {
                prop_assert!(store.apply_nodes(batch, &labels).is_ok());
                let report = store.check_consistency();
                prop_assert!(report.unregistered.is_empty());
                prop_assert!(report.broken_links.is_empty(), "{:?}", report.broken_links);
            }
        }
    }
}
