//! Per-node display settings.

use crate::element::Element;
use crate::error::{ModelError, ModelResult};
use crate::fields::{finish_save, object, opt_str, read_dirty};
use serde_json::{Map, Value};

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Returns the wire name.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }

            /// Parses a wire name.
            pub fn from_wire(s: &str) -> Option<Self> {
                match s {
                    $($wire => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

pub(crate) use wire_enum;

wire_enum! {
    /// Where new list items are inserted.
    NewListItemPlacement {
        /// Above existing items.
        Top => "TOP",
        /// Below existing items.
        Bottom => "BOTTOM",
    }
}

wire_enum! {
    /// Whether the checked-items section is expanded.
    GraveyardState {
        /// Expanded.
        Expanded => "EXPANDED",
        /// Collapsed.
        Collapsed => "COLLAPSED",
    }
}

wire_enum! {
    /// How checked items are displayed.
    CheckedListItemsPolicy {
        /// Inline with unchecked items.
        Default => "DEFAULT",
        /// Moved to the checked-items section.
        Graveyard => "GRAVEYARD",
    }
}

/// Display settings of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSettings {
    new_list_item_placement: NewListItemPlacement,
    graveyard_state: GraveyardState,
    checked_list_items_policy: CheckedListItemsPolicy,
    dirty: bool,
}

impl NodeSettings {
    /// Placement of new list items.
    pub fn new_list_item_placement(&self) -> NewListItemPlacement {
        self.new_list_item_placement
    }

    /// Sets the placement of new list items.
    pub fn set_new_list_item_placement(&mut self, value: NewListItemPlacement) {
        self.new_list_item_placement = value;
        self.dirty = true;
    }

    /// Graveyard state.
    pub fn graveyard_state(&self) -> GraveyardState {
        self.graveyard_state
    }

    /// Sets the graveyard state.
    pub fn set_graveyard_state(&mut self, value: GraveyardState) {
        self.graveyard_state = value;
        self.dirty = true;
    }

    /// Checked items policy.
    pub fn checked_list_items_policy(&self) -> CheckedListItemsPolicy {
        self.checked_list_items_policy
    }

    /// Sets the checked items policy.
    pub fn set_checked_list_items_policy(&mut self, value: CheckedListItemsPolicy) {
        self.checked_list_items_policy = value;
        self.dirty = true;
    }
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            new_list_item_placement: NewListItemPlacement::Bottom,
            graveyard_state: GraveyardState::Collapsed,
            checked_list_items_policy: CheckedListItemsPolicy::Graveyard,
            dirty: false,
        }
    }
}

fn parse<T>(raw: &Value, key: &str, from_wire: fn(&str) -> Option<T>, default: T) -> ModelResult<T> {
    match opt_str(raw, key) {
        None => Ok(default),
        Some(s) => from_wire(&s)
            .ok_or_else(|| ModelError::parse(format!("unknown `{key}` value {s}"), raw)),
    }
}

impl Element for NodeSettings {
    fn load(&mut self, raw: &Value) -> ModelResult<()> {
        object(raw, "nodeSettings")?;
        let defaults = NodeSettings::default();
        self.new_list_item_placement = parse(
            raw,
            "newListItemPlacement",
            NewListItemPlacement::from_wire,
            defaults.new_list_item_placement,
        )?;
        self.graveyard_state = parse(
            raw,
            "graveyardState",
            GraveyardState::from_wire,
            defaults.graveyard_state,
        )?;
        self.checked_list_items_policy = parse(
            raw,
            "checkedListItemsPolicy",
            CheckedListItemsPolicy::from_wire,
            defaults.checked_list_items_policy,
        )?;
        self.dirty = read_dirty(raw);
        Ok(())
    }

    fn save(&mut self, clean: bool) -> Value {
        let mut map = Map::new();
        map.insert(
            "newListItemPlacement".into(),
            Value::from(self.new_list_item_placement.as_str()),
        );
        map.insert(
            "graveyardState".into(),
            Value::from(self.graveyard_state.as_str()),
        );
        map.insert(
            "checkedListItemsPolicy".into(),
            Value::from(self.checked_list_items_policy.as_str()),
        );
        finish_save(map, &mut self.dirty, clean)
    }

    fn dirty(&self) -> bool {
        self.dirty
    }
}
