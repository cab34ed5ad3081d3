//! The save/load contract shared by every persisted entity.

use crate::error::ModelResult;
use serde_json::Value;

/// A persisted entity with dirty tracking.
///
/// `save(true)` produces the snapshot sent upstream and clears the dirty
/// bit. `save(false)` additionally records the dirty bit so pending state
/// survives a persisted snapshot. `load(save(e))` reconstructs an
/// observably equal entity.
pub trait Element {
    /// Loads state from a raw snapshot.
    fn load(&mut self, raw: &Value) -> ModelResult<()>;

    /// Serializes state into a raw snapshot.
    fn save(&mut self, clean: bool) -> Value;

    /// Returns true if the entity has changes not yet confirmed by the server.
    fn dirty(&self) -> bool;
}
