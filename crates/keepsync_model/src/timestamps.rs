//! Entity timestamps with trash/delete semantics.

use crate::element::Element;
use crate::error::{ModelError, ModelResult};
use crate::fields::{finish_save, object, opt_str, read_dirty, req_str};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

/// Wire format for timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Returns the Unix epoch, used as the "not set" marker for trash/delete.
pub fn epoch() -> DateTime<Utc> {
    int_to_dt(0)
}

/// Converts seconds since the epoch to a timestamp.
pub fn int_to_dt(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Formats a timestamp in wire format.
pub fn dt_to_str(dt: &DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a wire timestamp.
pub fn str_to_dt(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_field(raw: &Value, key: &str) -> ModelResult<Option<DateTime<Utc>>> {
    match opt_str(raw, key) {
        None => Ok(None),
        Some(s) => str_to_dt(&s)
            .map(Some)
            .ok_or_else(|| ModelError::parse(format!("bad timestamp in `{key}`"), raw)),
    }
}

/// Created/updated/trashed/deleted/edited instants of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTimestamps {
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    deleted: Option<DateTime<Utc>>,
    trashed: Option<DateTime<Utc>>,
    edited: Option<DateTime<Utc>>,
    dirty: bool,
}

impl NodeTimestamps {
    /// Creates timestamps for an entity created at `created` (now if `None`).
    pub fn new(created: Option<DateTime<Utc>>) -> Self {
        let created = created.unwrap_or_else(Utc::now);
        Self {
            created,
            updated: created,
            deleted: None,
            trashed: None,
            edited: None,
            dirty: false,
        }
    }

    /// Creation instant.
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Last update instant.
    pub fn updated(&self) -> DateTime<Utc> {
        self.updated
    }

    /// Deletion instant, if any.
    pub fn deleted(&self) -> Option<DateTime<Utc>> {
        self.deleted
    }

    /// Trash instant, if any.
    pub fn trashed(&self) -> Option<DateTime<Utc>> {
        self.trashed
    }

    /// Last user edit instant, if any.
    pub fn edited(&self) -> Option<DateTime<Utc>> {
        self.edited
    }

    /// Sets the creation instant.
    pub fn set_created(&mut self, value: DateTime<Utc>) {
        self.created = value;
        self.dirty = true;
    }

    /// Sets the update instant.
    pub fn set_updated(&mut self, value: DateTime<Utc>) {
        self.updated = value;
        self.dirty = true;
    }

    /// Sets the deletion instant.
    pub fn set_deleted(&mut self, value: Option<DateTime<Utc>>) {
        self.deleted = value;
        self.dirty = true;
    }

    /// Sets the trash instant.
    pub fn set_trashed(&mut self, value: Option<DateTime<Utc>>) {
        self.trashed = value;
        self.dirty = true;
    }

    /// Sets the edit instant.
    pub fn set_edited(&mut self, value: Option<DateTime<Utc>>) {
        self.edited = value;
        self.dirty = true;
    }

    /// Bumps `updated` (and `edited` when `edited` is set) to now.
    pub fn touch(&mut self, edited: bool) {
        let now = Utc::now();
        self.updated = now;
        if edited {
            self.edited = Some(now);
        }
        self.dirty = true;
    }

    /// Returns true if trashed after the epoch.
    pub fn is_trashed(&self) -> bool {
        self.trashed.is_some_and(|t| t > epoch())
    }

    /// Returns true if deleted after the epoch.
    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some_and(|t| t > epoch())
    }

    /// Moves the entity to the trash.
    pub fn trash(&mut self) {
        self.set_trashed(Some(Utc::now()));
    }

    /// Restores the entity from the trash.
    pub fn untrash(&mut self) {
        self.set_trashed(Some(epoch()));
    }

    /// Marks the entity deleted.
    pub fn delete(&mut self) {
        self.set_deleted(Some(Utc::now()));
    }

    /// Clears the deletion mark.
    pub fn undelete(&mut self) {
        self.set_deleted(None);
    }
}

impl Default for NodeTimestamps {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Element for NodeTimestamps {
    fn load(&mut self, raw: &Value) -> ModelResult<()> {
        object(raw, "timestamps")?;
        let created = str_to_dt(&req_str(raw, "created")?)
            .ok_or_else(|| ModelError::parse("bad timestamp in `created`", raw))?;
        let updated = str_to_dt(&req_str(raw, "updated")?)
            .ok_or_else(|| ModelError::parse("bad timestamp in `updated`", raw))?;
        let deleted = parse_field(raw, "deleted")?;
        let trashed = parse_field(raw, "trashed")?;
        let edited = parse_field(raw, "userEdited")?;

        self.created = created;
        self.updated = updated;
        self.deleted = deleted;
        self.trashed = trashed;
        self.edited = edited;
        self.dirty = read_dirty(raw);
        Ok(())
    }

    fn save(&mut self, clean: bool) -> Value {
        let mut map = Map::new();
        map.insert("kind".into(), Value::from("notes#timestamps"));
        map.insert("created".into(), Value::from(dt_to_str(&self.created)));
        if let Some(deleted) = &self.deleted {
            map.insert("deleted".into(), Value::from(dt_to_str(deleted)));
        }
        if let Some(trashed) = &self.trashed {
            map.insert("trashed".into(), Value::from(dt_to_str(trashed)));
        }
        map.insert("updated".into(), Value::from(dt_to_str(&self.updated)));
        if let Some(edited) = &self.edited {
            map.insert("userEdited".into(), Value::from(dt_to_str(edited)));
        }
        finish_save(map, &mut self.dirty, clean)
    }

    fn dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn format_round_trip() {
        let dt = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        let s = dt_to_str(&dt);
        assert_eq!(s, "2021-03-04T05:06:07.000Z");
        assert_eq!(str_to_dt(&s), Some(dt));
        assert_eq!(str_to_dt("2021-03-04T05:06:07Z"), Some(dt));
        assert_eq!(str_to_dt("yesterday"), None);
    }

    #[test]
    fn epoch_is_not_trashed() {
        let mut ts = NodeTimestamps::new(None);
        assert!(!ts.is_trashed());
        ts.untrash();
        assert!(!ts.is_trashed());
        assert!(ts.dirty());
        ts.trash();
        assert!(ts.is_trashed());
    }

    #[test]
    fn load_save_round_trip() {
        let raw = json!({
            "kind": "notes#timestamps",
            "created": "2020-01-01T00:00:00.000Z",
            "updated": "2020-01-02T00:00:00.000Z",
            "trashed": "1970-01-01T00:00:00.000Z",
            "userEdited": "2020-01-02T00:00:00.000Z",
            "_dirty": true
        });
        let mut ts = NodeTimestamps::default();
        ts.load(&raw).unwrap();
        assert!(ts.dirty());
        assert!(!ts.is_trashed());
        assert_eq!(ts.save(false), raw);

        let clean = ts.save(true);
        assert!(clean.get("_dirty").is_none());
        assert!(!ts.dirty());
    }

    #[test]
    fn missing_updated_fails() {
        let mut ts = NodeTimestamps::default();
        let err = ts.load(&json!({"created": "2020-01-01T00:00:00.000Z"}));
        assert!(matches!(err, Err(ModelError::Parse { .. })));
    }

    #[test]
    fn touch_sets_edited() {
        let mut ts = NodeTimestamps::new(Some(epoch()));
        ts.touch(false);
        assert!(ts.edited().is_none());
        ts.touch(true);
        assert_eq!(ts.edited(), Some(ts.updated()));
        assert!(ts.dirty());
    }
}
