//! Property-based test generators using proptest.
//!
//! Provides strategies for titles, item texts, sort keys and whole
//! checklists that stay within the model's limits.

use keepsync_model::{SORT_KEY_MAX, SORT_KEY_MIN};
use proptest::prelude::*;

/// Strategy for note and list titles.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9 ]{0,40}").expect("Invalid regex")
}

/// Strategy for single-line item texts.
pub fn item_text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9 ]{0,23}").expect("Invalid regex")
}

/// Strategy for sort keys inside the usable range.
pub fn sort_value_strategy() -> impl Strategy<Value = i64> {
    SORT_KEY_MIN..=SORT_KEY_MAX
}

/// Strategy for checklist contents as `(text, checked)` pairs.
pub fn list_items_strategy() -> impl Strategy<Value = Vec<(String, bool)>> {
    prop::collection::vec((item_text_strategy(), any::<bool>()), 0..12)
}

/// Strategy for label names, unique within the returned set.
pub fn label_names_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(
        prop::string::string_regex("[A-Z][a-z]{2,10}").expect("Invalid regex"),
        0..6,
    )
    .prop_map(|names| names.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::seeded_mirror;

    fn texts(mirror: &keepsync_model::Mirror, ids: &[String]) -> Vec<String> {
        ids.iter()
            .map(|id| mirror.get(id).unwrap().text().to_owned())
            .collect()
    }

    proptest! {
        #[test]
        fn created_lists_keep_item_order(title in title_strategy(), items in list_items_strategy()) {
            let mut mirror = seeded_mirror(7);
            let entries: Vec<(&str, bool)> = items.iter().map(|(t, c)| (t.as_str(), *c)).collect();
            let list = mirror.create_list(&title, &entries).unwrap();

            let ordered = mirror.store().list_items(&list).unwrap();
            let expected: Vec<String> = items.iter().map(|(t, _)| t.clone()).collect();
            prop_assert_eq!(texts(&mirror, &ordered), expected);

            let checked = mirror.store().checked_items(&list).unwrap().len();
            prop_assert_eq!(checked, items.iter().filter(|(_, c)| *c).count());
        }

        #[test]
        fn indented_item_follows_its_parent(items in prop::collection::vec(item_text_strategy(), 2..10)) {
            let mut mirror = seeded_mirror(9);
            let entries: Vec<(&str, bool)> = items.iter().map(|t| (t.as_str(), false)).collect();
            let list = mirror.create_list("", &entries).unwrap();
            let before = mirror.store().list_items(&list).unwrap();

            let parent = before[0].clone();
            let child = before[before.len() - 1].clone();
            mirror.store_mut().indent(&parent, &child, true).unwrap();

            let after = mirror.store().list_items(&list).unwrap();
            let mut expected = vec![parent, child];
            expected.extend(before[1..before.len() - 1].iter().cloned());
            prop_assert_eq!(after, expected);
        }

        #[test]
        fn sort_values_fit_in_i32(sort in sort_value_strategy()) {
            prop_assert!(i32::try_from(sort).is_ok());
        }

        #[test]
        fn label_names_are_unique(names in label_names_strategy()) {
            let mut mirror = seeded_mirror(3);
            for name in &names {
                mirror.create_label(name).unwrap();
            }
            prop_assert_eq!(mirror.labels().len(), names.len());
        }
    }
}
