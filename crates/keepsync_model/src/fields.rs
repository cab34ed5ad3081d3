//! Field accessors for raw JSON snapshots.
//!
//! Missing or mistyped required fields map to [`ModelError::Parse`]
//! carrying the offending fragment.

use crate::error::{ModelError, ModelResult};
use serde_json::{Map, Value};

/// Key under which unclean saves record the dirty bit.
pub const DIRTY_KEY: &str = "_dirty";

/// Returns the object map of `raw`.
pub fn object<'a>(raw: &'a Value, what: &str) -> ModelResult<&'a Map<String, Value>> {
    raw.as_object()
        .ok_or_else(|| ModelError::parse(format!("{what} must be an object"), raw))
}

/// Returns a required field.
pub fn required<'a>(raw: &'a Value, key: &str) -> ModelResult<&'a Value> {
    match raw.get(key) {
        Some(value) if !value.is_null() => Ok(value),
        _ => Err(ModelError::parse(format!("missing field `{key}`"), raw)),
    }
}

/// Returns a required string field.
pub fn req_str(raw: &Value, key: &str) -> ModelResult<String> {
    required(raw, key)?
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| ModelError::parse(format!("field `{key}` must be a string"), raw))
}

/// Returns an optional string field. Non-strings are treated as absent.
pub fn opt_str(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Returns an optional string field, stringifying numbers.
///
/// Version tokens arrive as either representation.
pub fn opt_token(raw: &Value, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Returns an optional boolean field.
pub fn opt_bool(raw: &Value, key: &str) -> Option<bool> {
    raw.get(key).and_then(Value::as_bool)
}

/// Returns an optional integer field.
///
/// Integers encoded as strings (`"sortValue": "123"`) are accepted.
pub fn opt_i64(raw: &Value, key: &str) -> ModelResult<Option<i64>> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| ModelError::parse(format!("field `{key}` is not an integer"), raw)),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ModelError::parse(format!("field `{key}` is not an integer"), raw)),
        Some(_) => Err(ModelError::parse(
            format!("field `{key}` is not an integer"),
            raw,
        )),
    }
}

/// Reads the persisted dirty bit. Absent means clean.
pub fn read_dirty(raw: &Value) -> bool {
    opt_bool(raw, DIRTY_KEY).unwrap_or(false)
}

/// Finishes a save: clears `dirty` on clean saves, records it otherwise.
pub fn finish_save(mut map: Map<String, Value>, dirty: &mut bool, clean: bool) -> Value {
    if clean {
        *dirty = false;
    } else {
        map.insert(DIRTY_KEY.into(), Value::Bool(*dirty));
    }
    Value::Object(map)
}
