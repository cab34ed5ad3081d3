//! Checklist ordering and nesting.
//!
//! The canonical sequence of a list is the pre-order traversal of the
//! forest formed by its unindented items and their subitems. It is derived
//! from an order key per item: the path of `(sort, id)` pairs from the
//! item's outermost ancestor down to the item. Keys compare element-wise
//! with higher sort values first, and a prefix precedes its extensions, so
//! nested items always follow their parent contiguously whatever their own
//! sort value.

use crate::error::{ModelError, ModelResult};
use crate::node::{Node, NodeKind, NodeType};
use crate::settings::NewListItemPlacement;
use crate::store::NodeStore;
use std::cmp::Ordering;

/// Gap between generated sort keys.
pub const SORT_DELTA: i64 = 10_000;

/// Largest usable sort key.
pub const SORT_KEY_MAX: i64 = i32::MAX as i64;

/// Smallest usable sort key.
pub const SORT_KEY_MIN: i64 = i32::MIN as i64;

/// Where to put a new list item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemPlacement {
    /// Above every existing item.
    Top,
    /// Below every existing item.
    Bottom,
    /// At an explicit sort key.
    Sort(i64),
}

impl From<NewListItemPlacement> for ItemPlacement {
    fn from(value: NewListItemPlacement) -> Self {
        match value {
            NewListItemPlacement::Top => ItemPlacement::Top,
            NewListItemPlacement::Bottom => ItemPlacement::Bottom,
        }
    }
}

type OrderKey = Vec<(i64, String)>;

fn compare_keys(a: &OrderKey, b: &OrderKey) -> Ordering {
    for ((a_sort, a_id), (b_sort, b_id)) in a.iter().zip(b.iter()) {
        let ord = b_sort.cmp(a_sort).then_with(|| a_id.cmp(b_id));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

impl NodeStore {
    fn list_item_node(&self, id: &str) -> ModelResult<&Node> {
        let node = self.node(id)?;
        if node.list_item().is_none() {
            return Err(ModelError::invalid(format!("{} is not a list item", node.id)));
        }
        Ok(node)
    }

    fn list_node(&self, id: &str) -> ModelResult<&Node> {
        let node = self.node(id)?;
        if !matches!(node.kind, NodeKind::List(_)) {
            return Err(ModelError::invalid(format!("{} is not a list", node.id)));
        }
        Ok(node)
    }

    fn order_key(&self, item: &Node) -> OrderKey {
        let mut key = vec![(item.sort, item.id.clone())];
        let mut current = item.list_item().and_then(|d| d.parent_item.clone());
        while let Some(parent_id) = current {
            let Some(parent) = self.get(&parent_id) else {
                break;
            };
            if key.iter().any(|(_, id)| id == &parent.id) {
                break;
            }
            key.insert(0, (parent.sort, parent.id.clone()));
            current = parent.list_item().and_then(|d| d.parent_item.clone());
        }
        key
    }

    fn ordered(&self, mut items: Vec<&Node>) -> Vec<String> {
        let mut keyed: Vec<(OrderKey, String)> = items
            .drain(..)
            .map(|n| (self.order_key(n), n.id.clone()))
            .collect();
        keyed.sort_by(|a, b| compare_keys(&a.0, &b.0));
        keyed.into_iter().map(|(_, id)| id).collect()
    }

    fn raw_items(&self, list_id: &str, checked: Option<bool>) -> ModelResult<Vec<&Node>> {
        let list = self.list_node(list_id)?;
        Ok(list
            .children
            .iter()
            .filter_map(|c| self.get(c))
            .filter(|n| match n.list_item() {
                Some(item) => checked.map_or(true, |c| item.checked == c),
                None => false,
            })
            .collect())
    }

    /// Items of a list in canonical order.
    pub fn list_items(&self, list_id: &str) -> ModelResult<Vec<String>> {
        Ok(self.ordered(self.raw_items(list_id, None)?))
    }

    /// Checked items of a list in canonical order.
    pub fn checked_items(&self, list_id: &str) -> ModelResult<Vec<String>> {
        Ok(self.ordered(self.raw_items(list_id, Some(true))?))
    }

    /// Unchecked items of a list in canonical order.
    pub fn unchecked_items(&self, list_id: &str) -> ModelResult<Vec<String>> {
        Ok(self.ordered(self.raw_items(list_id, Some(false))?))
    }

    /// Items nested under `item_id`, in canonical order.
    pub fn subitems(&self, item_id: &str) -> ModelResult<Vec<String>> {
        let item = self.list_item_node(item_id)?;
        let subs = item
            .list_item()
            .map(|d| d.subitems.iter().filter_map(|s| self.get(s)).collect())
            .unwrap_or_default();
        Ok(self.ordered(subs))
    }

    /// Adds an item to a list.
    ///
    /// Without an explicit placement the list's `newListItemPlacement`
    /// setting decides. Top placement takes the largest sibling key plus
    /// [`SORT_DELTA`]; bottom placement the smallest minus it.
    pub fn add_list_item(
        &mut self,
        list_id: &str,
        text: &str,
        checked: bool,
        placement: Option<ItemPlacement>,
    ) -> ModelResult<String> {
        let list = self.list_node(list_id)?;
        let list_id = list.id.clone();
        let placement =
            placement.unwrap_or_else(|| list.settings.new_list_item_placement().into());
        let sorts: Vec<i64> = self
            .raw_items(&list_id, None)?
            .iter()
            .map(|n| n.sort)
            .collect();

        let exhausted = || ModelError::SortKeyExhausted {
            list_id: list_id.clone(),
        };
        let sort = match placement {
            ItemPlacement::Sort(sort) => Some(sort),
            ItemPlacement::Top => match sorts.iter().max() {
                Some(max) => Some(
                    max.checked_add(SORT_DELTA)
                        .filter(|s| *s <= SORT_KEY_MAX)
                        .ok_or_else(exhausted)?,
                ),
                None => None,
            },
            ItemPlacement::Bottom => match sorts.iter().min() {
                Some(min) => Some(
                    min.checked_sub(SORT_DELTA)
                        .filter(|s| *s >= SORT_KEY_MIN)
                        .ok_or_else(exhausted)?,
                ),
                None => None,
            },
        };

        let mut item = self.new_node(NodeType::ListItem, &list_id);
        if let Some(sort) = sort {
            item.sort = sort;
        }
        item.text = text.to_owned();
        if let Some(data) = item.list_item_mut() {
            data.checked = checked;
        }
        let id = self.insert_child(&list_id, item)?;
        self.node_mut(&list_id)?.touch(true);
        Ok(id)
    }

    /// Nests `child` under `parent`.
    ///
    /// Only leaf items may be nested, and only one level deep. Re-indenting
    /// under the current parent is a no-op.
    pub fn indent(&mut self, parent: &str, child: &str, dirty: bool) -> ModelResult<()> {
        let parent_node = self.list_item_node(parent)?;
        let child_node = self.list_item_node(child)?;
        let parent_id = parent_node.id.clone();
        let child_id = child_node.id.clone();

        if parent_id == child_id {
            return Err(ModelError::invalid("an item cannot be nested under itself"));
        }
        if parent_node.parent != child_node.parent {
            return Err(ModelError::invalid(format!(
                "{child_id} and {parent_id} belong to different lists"
            )));
        }
        let child_data = child_node.list_item().map(|d| (d.subitems.len(), d.parent_item.clone()));
        let (subitem_count, current_parent) = child_data.unwrap_or_default();
        if current_parent.as_deref() == Some(parent_id.as_str()) {
            return Ok(());
        }
        if subitem_count > 0 {
            return Err(ModelError::invalid(format!(
                "{child_id} has subitems and cannot be nested"
            )));
        }
        if parent_node.list_item().is_some_and(|d| d.parent_item.is_some()) {
            return Err(ModelError::invalid(format!(
                "{parent_id} is nested and cannot take subitems"
            )));
        }

        if let Some(old) = current_parent {
            self.dedent(&old, &child_id, false)?;
        }

        if let Some(data) = self.node_mut(&parent_id)?.list_item_mut() {
            data.subitems.push(child_id.clone());
        }
        let child = self.node_mut(&child_id)?;
        if let Some(data) = child.list_item_mut() {
            data.super_list_item_id = Some(parent_id.clone());
            data.parent_item = Some(parent_id);
        }
        if dirty {
            child.touch(true);
        }
        Ok(())
    }

    /// Removes the nesting of `child` under `parent`. A no-op if `child` is
    /// not nested there.
    pub fn dedent(&mut self, parent: &str, child: &str, dirty: bool) -> ModelResult<()> {
        let parent_id = self.list_item_node(parent)?.id.clone();
        let child_id = self.list_item_node(child)?.id.clone();

        let Some(parent_data) = self.node_mut(&parent_id)?.list_item_mut() else {
            return Ok(());
        };
        let before = parent_data.subitems.len();
        parent_data.subitems.retain(|s| s != &child_id);
        if parent_data.subitems.len() == before {
            return Ok(());
        }

        let child = self.node_mut(&child_id)?;
        if let Some(data) = child.list_item_mut() {
            data.super_list_item_id = None;
            data.parent_item = None;
        }
        if dirty {
            child.touch(true);
        }
        Ok(())
    }

    /// Reorders the items of a list with `compare` and renumbers their keys.
    pub fn sort_items<F>(&mut self, list_id: &str, mut compare: F) -> ModelResult<()>
    where
        F: FnMut(&Node, &Node) -> Ordering,
    {
        let mut items = self.raw_items(list_id, None)?;
        items.sort_by(|a, b| compare(a, b));
        let ids: Vec<String> = items.iter().map(|n| n.id.clone()).collect();

        let mut sort = self.ids_mut().sort_value();
        for id in ids {
            self.node_mut(&id)?.set_sort(sort);
            sort -= SORT_DELTA;
        }
        Ok(())
    }

    /// Renders a list as its title followed by one line per item.
    pub fn list_text(&self, list_id: &str) -> ModelResult<String> {
        let list = self.list_node(list_id)?;
        let mut lines = vec![list.top_level().map(|t| t.title.clone()).unwrap_or_default()];
        for id in self.list_items(list_id)? {
            let item = self.node(&id)?;
            let data = item.list_item();
            let indent = if data.is_some_and(|d| d.indented()) { "  " } else { "" };
            let mark = if data.is_some_and(|d| d.checked) { "☑" } else { "☐" };
            lines.push(format!("{indent}{mark} {}", item.text));
        }
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdGenerator;
    use crate::node::ROOT_ID;
    use proptest::prelude::*;

    fn list_with(sorts: &[i64]) -> (NodeStore, String, Vec<String>) {
        let mut store = NodeStore::new(IdGenerator::seeded(21));
        let list = store.new_node(NodeType::List, ROOT_ID);
        let list = store.add(list).unwrap();
        let items = sorts
            .iter()
            .enumerate()
            .map(|(i, s)| {
                store
                    .add_list_item(&list, &format!("item {i}"), false, Some(ItemPlacement::Sort(*s)))
                    .unwrap()
            })
            .collect();
        (store, list, items)
    }

    #[test]
    fn indent_dedent_canonical_order() {
        let (mut store, list, ids) = list_with(&[100, 90, 80]);
        let (a, b, c) = (&ids[0], &ids[1], &ids[2]);

        store.indent(a, b, true).unwrap();
        assert_eq!(store.list_items(&list).unwrap(), vec![a.clone(), b.clone(), c.clone()]);

        store.dedent(a, b, true).unwrap();
        store.indent(c, b, true).unwrap();
        assert_eq!(store.list_items(&list).unwrap(), vec![a.clone(), c.clone(), b.clone()]);
        assert_eq!(store.subitems(c).unwrap(), vec![b.clone()]);
    }

    #[test]
    fn indent_rejects_items_with_subitems() {
        let (mut store, _, ids) = list_with(&[300, 200, 100]);
        store.indent(&ids[0], &ids[1], true).unwrap();
        assert!(store.indent(&ids[2], &ids[0], true).is_err());
        assert!(store.indent(&ids[1], &ids[2], true).is_err());
        store.indent(&ids[0], &ids[1], true).unwrap();
        assert_eq!(store.subitems(&ids[0]).unwrap().len(), 1);
    }

    #[test]
    fn placement_uses_gapped_keys() {
        let (mut store, list, ids) = list_with(&[5_000]);
        let top = store
            .add_list_item(&list, "top", false, Some(ItemPlacement::Top))
            .unwrap();
        let bottom = store
            .add_list_item(&list, "bottom", false, Some(ItemPlacement::Bottom))
            .unwrap();
        assert_eq!(store.get(&top).unwrap().sort(), 5_000 + SORT_DELTA);
        assert_eq!(store.get(&bottom).unwrap().sort(), 5_000 - SORT_DELTA);
        assert_eq!(
            store.list_items(&list).unwrap(),
            vec![top, ids[0].clone(), bottom]
        );
    }

    #[test]
    fn sort_keys_exhaust_at_the_top() {
        let (mut store, list, _) = list_with(&[SORT_KEY_MAX - SORT_DELTA]);
        store
            .add_list_item(&list, "last", false, Some(ItemPlacement::Top))
            .unwrap();
        assert!(matches!(
            store.add_list_item(&list, "overflow", false, Some(ItemPlacement::Top)),
            Err(ModelError::SortKeyExhausted { .. })
        ));

        let (mut store, list, _) = list_with(&[SORT_KEY_MIN + 1]);
        assert!(matches!(
            store.add_list_item(&list, "underflow", false, Some(ItemPlacement::Bottom)),
            Err(ModelError::SortKeyExhausted { .. })
        ));
    }

    #[test]
    fn default_placement_follows_settings() {
        let (mut store, list, ids) = list_with(&[0]);
        let bottom = store.add_list_item(&list, "b", false, None).unwrap();
        assert_eq!(store.get(&bottom).unwrap().sort(), -SORT_DELTA);
        assert_eq!(store.list_items(&list).unwrap()[0], ids[0]);
    }

    #[test]
    fn sort_items_renumbers() {
        let (mut store, list, ids) = list_with(&[10, 20, 30]);
        store
            .sort_items(&list, |a, b| a.text().cmp(b.text()))
            .unwrap();
        assert_eq!(store.list_items(&list).unwrap(), ids);
        let first = store.get(&ids[0]).unwrap().sort();
        let second = store.get(&ids[1]).unwrap().sort();
        assert_eq!(first - second, SORT_DELTA);
    }

    #[test]
    fn checked_filters_and_text() {
        let (mut store, list, ids) = list_with(&[30, 20, 10]);
        store.node_mut(&ids[1]).unwrap().set_checked(true).unwrap();
        store.indent(&ids[0], &ids[2], false).unwrap();
        store.node_mut(&list).unwrap().set_title("Todo").unwrap();

        assert_eq!(store.checked_items(&list).unwrap(), vec![ids[1].clone()]);
        assert_eq!(store.unchecked_items(&list).unwrap().len(), 2);
        assert_eq!(
            store.list_text(&list).unwrap(),
            "Todo\n☐ item 0\n  ☐ item 2\n☑ item 1"
        );
    }

    proptest! {
        #[test]
        fn nesting_edits_keep_canonical_order(
            sorts in prop::collection::vec(-1_000i64..1_000, 2..8),
            edits in prop::collection::vec((any::<bool>(), 0usize..8, 0usize..8), 0..16),
        ) {
            let (mut store, list, ids) = list_with(&sorts);
            for (indent, parent, child) in edits {
                let parent = &ids[parent % ids.len()];
                let child = &ids[child % ids.len()];
                let _ = if indent {
                    store.indent(parent, child, true)
                } else {
                    store.dedent(parent, child, true)
                };
            }

            let rank = |id: &String| (std::cmp::Reverse(store.get(id).unwrap().sort()), id.clone());
            let mut top: Vec<String> = ids
                .iter()
                .filter(|id| store.get(id).unwrap().list_item().unwrap().parent_item().is_none())
                .cloned()
                .collect();
            top.sort_by_key(rank);
            let mut expected = Vec::new();
            for parent in top {
                let mut subs = store.subitems(&parent).unwrap();
                subs.sort_by_key(rank);
                expected.push(parent);
                expected.extend(subs);
            }

            prop_assert_eq!(expected.len(), ids.len());
            prop_assert_eq!(store.list_items(&list).unwrap(), expected);
        }
    }
}
