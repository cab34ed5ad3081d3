//! Labels, the label registry and per-node label links.

use crate::element::Element;
use crate::error::{ModelError, ModelResult};
use crate::fields::{finish_save, object, opt_str, read_dirty, req_str, required};
use crate::id::IdGenerator;
use crate::timestamps::{dt_to_str, epoch, str_to_dt, NodeTimestamps};
use chrono::{DateTime, SubsecRound, Utc};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// A named tag referenced by id from notes and lists.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    id: String,
    name: String,
    timestamps: NodeTimestamps,
    merged: DateTime<Utc>,
    dirty: bool,
}

impl Label {
    /// Creates a new, dirty label.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            timestamps: NodeTimestamps::new(None),
            merged: epoch(),
            dirty: true,
        }
    }

    fn blank() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            timestamps: NodeTimestamps::new(None),
            merged: epoch(),
            dirty: false,
        }
    }

    /// Decodes a label snapshot.
    pub fn from_json(raw: &Value) -> ModelResult<Self> {
        let mut label = Self::blank();
        label.load(raw)?;
        Ok(label)
    }

    /// The label id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The label name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the label.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch(true);
    }

    /// Last merge instant.
    pub fn merged(&self) -> DateTime<Utc> {
        self.merged
    }

    /// Sets the last merge instant.
    pub fn set_merged(&mut self, value: DateTime<Utc>) {
        self.merged = value;
        self.touch(false);
    }

    /// The label timestamps.
    pub fn timestamps(&self) -> &NodeTimestamps {
        &self.timestamps
    }

    /// Marks the label deleted.
    pub fn delete(&mut self) {
        self.timestamps.delete();
        self.dirty = true;
    }

    /// Marks the label changed.
    pub fn touch(&mut self, edited: bool) {
        self.dirty = true;
        self.timestamps.touch(edited);
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Element for Label {
    fn load(&mut self, raw: &Value) -> ModelResult<()> {
        object(raw, "label")?;
        let id = req_str(raw, "mainId")?;
        let name = req_str(raw, "name")?;
        let mut timestamps = self.timestamps.clone();
        timestamps.load(required(raw, "timestamps")?)?;
        let merged = match opt_str(raw, "lastMerged") {
            Some(s) => str_to_dt(&s)
                .ok_or_else(|| ModelError::parse("bad timestamp in `lastMerged`", raw))?,
            None => epoch(),
        };

        self.id = id;
        self.name = name;
        self.timestamps = timestamps;
        self.merged = merged;
        self.dirty = read_dirty(raw);
        Ok(())
    }

    fn save(&mut self, clean: bool) -> Value {
        let mut map = Map::new();
        map.insert("mainId".into(), Value::from(self.id.clone()));
        map.insert("name".into(), Value::from(self.name.clone()));
        map.insert("timestamps".into(), self.timestamps.save(clean));
        map.insert("lastMerged".into(), Value::from(dt_to_str(&self.merged)));
        finish_save(map, &mut self.dirty, clean)
    }

    fn dirty(&self) -> bool {
        self.dirty || self.timestamps.dirty()
    }
}

/// Counts produced by [`LabelRegistry::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelApplyReport {
    /// Labels created from the payload.
    pub created: usize,
    /// Labels updated in place.
    pub updated: usize,
    /// Registered labels absent from the payload.
    pub removed: usize,
    /// Payload entries that failed to load.
    pub discarded: usize,
}

/// All labels of the account, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct LabelRegistry {
    labels: BTreeMap<String, Label>,
}

impl LabelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns true if there are no labels.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Looks up a label by id.
    pub fn get(&self, id: &str) -> Option<&Label> {
        self.labels.get(id)
    }

    /// Looks up a label by id for mutation.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Label> {
        self.labels.get_mut(id)
    }

    /// Finds a label by name, ignoring case.
    pub fn find(&self, name: &str) -> Option<&Label> {
        let needle = name.to_lowercase();
        self.labels
            .values()
            .find(|label| label.name.to_lowercase() == needle)
    }

    /// Finds labels whose name matches `pattern`.
    pub fn find_matching(&self, pattern: &Regex) -> Vec<&Label> {
        self.labels
            .values()
            .filter(|label| pattern.is_match(&label.name))
            .collect()
    }

    /// Creates a label. Fails if the name is taken.
    pub fn create(&mut self, name: &str, ids: &mut IdGenerator) -> ModelResult<&Label> {
        if self.find(name).is_some() {
            return Err(ModelError::Label {
                message: format!("label exists: {name}"),
            });
        }
        let label = Label::new(ids.label_id(), name);
        let id = label.id.clone();
        debug!(label = %id, name, "created label");
        Ok(self.labels.entry(id).or_insert(label))
    }

    /// Removes a label from the registry.
    pub fn remove(&mut self, id: &str) -> Option<Label> {
        self.labels.remove(id)
    }

    /// All labels ordered by id.
    pub fn all(&self) -> impl Iterator<Item = &Label> {
        self.labels.values()
    }

    /// Returns true if any label has unsent changes.
    pub fn any_dirty(&self) -> bool {
        self.labels.values().any(Element::dirty)
    }

    /// Saves every label.
    pub fn save_all(&mut self, clean: bool) -> Vec<Value> {
        self.labels.values_mut().map(|l| l.save(clean)).collect()
    }

    /// Marks the given labels dirty again.
    pub fn remark_dirty<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        for id in ids {
            if let Some(label) = self.labels.get_mut(id) {
                label.mark_dirty();
            }
        }
    }

    /// Replaces the registry with the full label list sent by the server.
    ///
    /// Known labels are updated in place, unknown ones created, and any
    /// registered label absent from `raw` is removed. Every entry must carry
    /// a string `mainId`; otherwise the registry is left untouched.
    pub fn apply(&mut self, raw: &[Value]) -> ModelResult<LabelApplyReport> {
        for entry in raw {
            req_str(entry, "mainId")?;
        }

        let mut report = LabelApplyReport::default();
        let mut seen = Vec::with_capacity(raw.len());

        for entry in raw {
            let id = req_str(entry, "mainId")?;
            seen.push(id.clone());
            match self.labels.get_mut(&id) {
                Some(label) => {
                    let mut updated = label.clone();
                    match updated.load(entry) {
                        Ok(()) => {
                            *label = updated;
                            report.updated += 1;
                            debug!(label = %id, "updated label");
                        }
                        Err(e) => {
                            warn!(label = %id, error = %e, "discarding label update");
                            report.discarded += 1;
                        }
                    }
                }
                None => match Label::from_json(entry) {
                    Ok(label) => {
                        debug!(label = %id, "created label");
                        self.labels.insert(id, label);
                        report.created += 1;
                    }
                    Err(e) => {
                        warn!(label = %id, error = %e, "discarding new label");
                        report.discarded += 1;
                    }
                },
            }
        }

        let stale: Vec<String> = self
            .labels
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            debug!(label = %id, "removed label");
            self.labels.remove(&id);
            report.removed += 1;
        }

        info!(
            created = report.created,
            updated = report.updated,
            removed = report.removed,
            "applied labels"
        );
        Ok(report)
    }
}

/// State of a label link on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelLink {
    /// The label is applied.
    Active,
    /// The label was removed at the given instant; kept so the removal is
    /// sent upstream.
    Removed(DateTime<Utc>),
}

impl LabelLink {
    /// Returns true if the label is applied.
    pub fn is_active(&self) -> bool {
        matches!(self, LabelLink::Active)
    }
}

/// Removal instant at wire precision.
fn removed_now() -> LabelLink {
    LabelLink::Removed(Utc::now().trunc_subsecs(3))
}

/// Label links of a top-level node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeLabels {
    links: BTreeMap<String, LabelLink>,
    dirty: bool,
}

impl NodeLabels {
    /// Applies a label.
    pub fn add(&mut self, label_id: impl Into<String>) {
        self.links.insert(label_id.into(), LabelLink::Active);
        self.dirty = true;
    }

    /// Removes a label, keeping a tombstone.
    pub fn remove(&mut self, label_id: &str) {
        if self.links.get(label_id).is_some_and(LabelLink::is_active) {
            self.links.insert(label_id.to_owned(), removed_now());
            self.dirty = true;
        }
    }

    /// Returns true if the label is applied.
    pub fn contains(&self, label_id: &str) -> bool {
        self.links.get(label_id).is_some_and(LabelLink::is_active)
    }

    /// Ids of applied labels.
    pub fn ids(&self) -> Vec<&str> {
        self.links
            .iter()
            .filter(|(_, link)| link.is_active())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Link state of a label id.
    pub fn link(&self, label_id: &str) -> Option<LabelLink> {
        self.links.get(label_id).copied()
    }

    /// Returns true if no links are recorded.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Re-resolves links against the registry.
    ///
    /// Links to labels the registry no longer knows become tombstones.
    pub fn resolve(&mut self, registry: &LabelRegistry) {
        for (id, link) in self.links.iter_mut() {
            if link.is_active() && registry.get(id).is_none() {
                *link = removed_now();
            }
        }
    }
}

impl Element for NodeLabels {
    fn load(&mut self, raw: &Value) -> ModelResult<()> {
        let entries = raw
            .as_array()
            .ok_or_else(|| ModelError::parse("labelIds must be an array", raw))?;
        let mut entries = entries.as_slice();
        let mut dirty = false;
        if let Some((Value::Bool(flag), rest)) = entries.split_last() {
            dirty = *flag;
            entries = rest;
        }

        let mut links = BTreeMap::new();
        for entry in entries {
            let id = req_str(entry, "labelId")?;
            let link = match opt_str(entry, "deleted").and_then(|s| str_to_dt(&s)) {
                Some(at) if at > epoch() => LabelLink::Removed(at),
                _ => LabelLink::Active,
            };
            links.insert(id, link);
        }

        self.links = links;
        self.dirty = dirty;
        Ok(())
    }

    fn save(&mut self, clean: bool) -> Value {
        let zero = dt_to_str(&epoch());
        let mut list: Vec<Value> = self
            .links
            .iter()
            .map(|(id, link)| {
                let deleted = match link {
                    LabelLink::Active => zero.clone(),
                    LabelLink::Removed(at) => dt_to_str(at),
                };
                json!({"labelId": id, "deleted": deleted})
            })
            .collect();
        if clean {
            self.dirty = false;
        } else {
            list.push(Value::Bool(self.dirty));
        }
        Value::Array(list)
    }

    fn dirty(&self) -> bool {
        self.dirty
    }
}
