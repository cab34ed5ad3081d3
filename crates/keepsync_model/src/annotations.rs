//! Sidecar metadata attached to notes.
//!
//! Annotations are a closed sum type decoded by the discriminating key of
//! the raw object (`webLink`, `topicCategory`, `taskAssist`, `context`).

use crate::element::Element;
use crate::error::{ModelError, ModelResult};
use crate::fields::{finish_save, object, opt_str, read_dirty, req_str};
use crate::id::IdGenerator;
use crate::settings::wire_enum;
use serde_json::{Map, Value};
use tracing::warn;

wire_enum! {
    /// Topic category assigned to a note.
    CategoryValue {
        /// Books.
        Books => "BOOKS",
        /// Food.
        Food => "FOOD",
        /// Movies.
        Movies => "MOVIES",
        /// Music.
        Music => "MUSIC",
        /// Places.
        Places => "PLACES",
        /// Quotes.
        Quotes => "QUOTES",
        /// Travel.
        Travel => "TRAVEL",
        /// TV.
        Tv => "TV",
    }
}

/// A web link preview.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WebLink {
    /// Page title.
    pub title: String,
    /// Link target.
    pub url: String,
    /// Preview image.
    pub image_url: Option<String>,
    /// Where the link was found.
    pub provenance_url: String,
    /// Page description.
    pub description: String,
}

/// The payload of an annotation.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationKind {
    /// Web link preview.
    WebLink(WebLink),
    /// Topic category.
    Category(CategoryValue),
    /// Task assist suggestion.
    TaskAssist {
        /// Suggestion type, e.g. `GROCERY_ITEM`.
        suggest: String,
    },
    /// Nested context annotations, keyed by their discriminant.
    Context(Vec<AnnotationKind>),
}

const KEYS: [&str; 4] = ["webLink", "topicCategory", "taskAssist", "context"];

impl AnnotationKind {
    /// The discriminating key of this kind.
    pub fn key(&self) -> &'static str {
        match self {
            AnnotationKind::WebLink(_) => "webLink",
            AnnotationKind::Category(_) => "topicCategory",
            AnnotationKind::TaskAssist { .. } => "taskAssist",
            AnnotationKind::Context(_) => "context",
        }
    }

    /// Decodes the kind from an object holding one discriminating key.
    ///
    /// Returns `Ok(None)` when no known key is present.
    pub fn from_raw(raw: &Value) -> ModelResult<Option<Self>> {
        for key in KEYS {
            if let Some(body) = raw.get(key) {
                return Self::from_keyed(key, body).map(Some);
            }
        }
        Ok(None)
    }

    fn from_keyed(key: &str, body: &Value) -> ModelResult<Self> {
        match key {
            "webLink" => {
                object(body, "webLink")?;
                Ok(AnnotationKind::WebLink(WebLink {
                    title: opt_str(body, "title").unwrap_or_default(),
                    url: req_str(body, "url")?,
                    image_url: opt_str(body, "imageUrl"),
                    provenance_url: opt_str(body, "provenanceUrl").unwrap_or_default(),
                    description: opt_str(body, "description").unwrap_or_default(),
                }))
            }
            "topicCategory" => {
                let category = req_str(body, "category")?;
                CategoryValue::from_wire(&category)
                    .map(AnnotationKind::Category)
                    .ok_or_else(|| ModelError::parse(format!("unknown category {category}"), body))
            }
            "taskAssist" => Ok(AnnotationKind::TaskAssist {
                suggest: req_str(body, "suggestType")?,
            }),
            "context" => {
                let entries = object(body, "context")?;
                let mut nested = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    if KEYS.contains(&key.as_str()) {
                        nested.push(Self::from_keyed(key, value)?);
                    } else {
                        warn!(key = %key, "skipping unknown context annotation");
                    }
                }
                Ok(AnnotationKind::Context(nested))
            }
            other => Err(ModelError::parse(
                format!("unknown annotation key {other}"),
                body,
            )),
        }
    }

    fn body(&self) -> Value {
        match self {
            AnnotationKind::WebLink(link) => {
                let mut map = Map::new();
                map.insert("title".into(), Value::from(link.title.clone()));
                map.insert("url".into(), Value::from(link.url.clone()));
                if let Some(image) = &link.image_url {
                    map.insert("imageUrl".into(), Value::from(image.clone()));
                }
                map.insert(
                    "provenanceUrl".into(),
                    Value::from(link.provenance_url.clone()),
                );
                map.insert("description".into(), Value::from(link.description.clone()));
                Value::Object(map)
            }
            AnnotationKind::Category(category) => {
                serde_json::json!({ "category": category.as_str() })
            }
            AnnotationKind::TaskAssist { suggest } => {
                serde_json::json!({ "suggestType": suggest })
            }
            AnnotationKind::Context(entries) => {
                let mut map = Map::new();
                for entry in entries {
                    map.insert(entry.key().into(), entry.body());
                }
                Value::Object(map)
            }
        }
    }
}

/// A single annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    id: Option<String>,
    kind: AnnotationKind,
    dirty: bool,
}

impl Annotation {
    /// Creates a new, dirty annotation.
    pub fn new(id: impl Into<String>, kind: AnnotationKind) -> Self {
        Self {
            id: Some(id.into()),
            kind,
            dirty: true,
        }
    }

    /// Decodes an annotation. Returns `Ok(None)` for unknown shapes.
    pub fn from_json(raw: &Value) -> ModelResult<Option<Self>> {
        let Some(kind) = AnnotationKind::from_raw(raw)? else {
            return Ok(None);
        };
        let mut annotation = Self {
            id: None,
            kind,
            dirty: false,
        };
        annotation.load(raw)?;
        Ok(Some(annotation))
    }

    /// The annotation id.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The payload.
    pub fn kind(&self) -> &AnnotationKind {
        &self.kind
    }

    /// Replaces the payload.
    pub fn set_kind(&mut self, kind: AnnotationKind) {
        self.kind = kind;
        self.dirty = true;
    }
}

impl Element for Annotation {
    fn load(&mut self, raw: &Value) -> ModelResult<()> {
        object(raw, "annotation")?;
        self.kind = AnnotationKind::from_raw(raw)?
            .ok_or_else(|| ModelError::parse("unknown annotation", raw))?;
        self.id = opt_str(raw, "id");
        self.dirty = read_dirty(raw);
        Ok(())
    }

    fn save(&mut self, clean: bool) -> Value {
        let mut map = Map::new();
        if let Some(id) = &self.id {
            map.insert("id".into(), Value::from(id.clone()));
        }
        map.insert(self.kind.key().into(), self.kind.body());
        finish_save(map, &mut self.dirty, clean)
    }

    fn dirty(&self) -> bool {
        self.dirty
    }
}

/// The annotation group of a node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeAnnotations {
    annotations: Vec<Annotation>,
    dirty: bool,
}

impl NodeAnnotations {
    /// Number of annotations.
    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    /// Returns true if there are no annotations.
    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// All annotations in insertion order.
    pub fn all(&self) -> &[Annotation] {
        &self.annotations
    }

    /// The topic category, if any.
    pub fn category(&self) -> Option<CategoryValue> {
        self.annotations.iter().find_map(|a| match a.kind {
            AnnotationKind::Category(c) => Some(c),
            _ => None,
        })
    }

    /// Sets or clears the topic category.
    pub fn set_category(&mut self, value: Option<CategoryValue>, ids: &mut IdGenerator) {
        let existing = self
            .annotations
            .iter()
            .position(|a| matches!(a.kind, AnnotationKind::Category(_)));
        match (existing, value) {
            (Some(index), Some(category)) => {
                self.annotations[index].set_kind(AnnotationKind::Category(category));
            }
            (Some(index), None) => {
                self.annotations.remove(index);
                self.dirty = true;
            }
            (None, Some(category)) => {
                self.append(Annotation::new(
                    ids.annotation_id(),
                    AnnotationKind::Category(category),
                ));
            }
            (None, None) => {}
        }
    }

    /// All web links.
    pub fn links(&self) -> Vec<&WebLink> {
        self.annotations
            .iter()
            .filter_map(|a| match &a.kind {
                AnnotationKind::WebLink(link) => Some(link),
                _ => None,
            })
            .collect()
    }

    /// Appends an annotation.
    pub fn append(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
        self.dirty = true;
    }

    /// Removes an annotation by id. Returns true if one was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.annotations.len();
        self.annotations.retain(|a| a.id() != Some(id));
        let removed = self.annotations.len() != before;
        if removed {
            self.dirty = true;
        }
        removed
    }
}

impl Element for NodeAnnotations {
    fn load(&mut self, raw: &Value) -> ModelResult<()> {
        object(raw, "annotationsGroup")?;
        let mut annotations = Vec::new();
        if let Some(list) = raw.get("annotations").and_then(Value::as_array) {
            for entry in list {
                match Annotation::from_json(entry)? {
                    Some(annotation) => annotations.push(annotation),
                    None => warn!(raw = %entry, "skipping unknown annotation"),
                }
            }
        }
        self.annotations = annotations;
        self.dirty = read_dirty(raw);
        Ok(())
    }

    fn save(&mut self, clean: bool) -> Value {
        let mut map = Map::new();
        map.insert("kind".into(), Value::from("notes#annotationsGroup"));
        if !self.annotations.is_empty() {
            let list = self
                .annotations
                .iter_mut()
                .map(|a| a.save(clean))
                .collect::<Vec<_>>();
            map.insert("annotations".into(), Value::Array(list));
        }
        finish_save(map, &mut self.dirty, clean)
    }

    fn dirty(&self) -> bool {
        self.dirty || self.annotations.iter().any(Element::dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "kind": "notes#annotationsGroup",
            "annotations": [
                {"id": "a1", "webLink": {
                    "title": "Rust", "url": "https://rust-lang.org",
                    "provenanceUrl": "https://rust-lang.org", "description": "lang"
                }},
                {"id": "a2", "topicCategory": {"category": "FOOD"}},
                {"id": "a3", "taskAssist": {"suggestType": "GROCERY_ITEM"}},
                {"id": "a4", "context": {"topicCategory": {"category": "TV"}}},
                {"id": "a5", "somethingNew": {}}
            ]
        })
    }

    #[test]
    fn dispatch_on_key() {
        let mut group = NodeAnnotations::default();
        group.load(&sample()).unwrap();

        assert_eq!(group.len(), 4);
        assert_eq!(group.category(), Some(CategoryValue::Food));
        assert_eq!(group.links()[0].url, "https://rust-lang.org");
        assert_eq!(
            group.all()[3].kind(),
            &AnnotationKind::Context(vec![AnnotationKind::Category(CategoryValue::Tv)])
        );
        assert!(!group.dirty());
    }

    #[test]
    fn round_trip_unclean() {
        let mut group = NodeAnnotations::default();
        group.load(&sample()).unwrap();
        let saved = group.save(false);

        let mut again = NodeAnnotations::default();
        again.load(&saved).unwrap();
        assert_eq!(again, group);
    }

    #[test]
    fn child_dirty_propagates() {
        let mut ids = IdGenerator::seeded(9);
        let mut group = NodeAnnotations::default();
        group.set_category(Some(CategoryValue::Books), &mut ids);
        assert!(group.dirty());
        group.save(true);
        assert!(!group.dirty());

        group.set_category(Some(CategoryValue::Music), &mut ids);
        assert_eq!(group.len(), 1);
        assert!(group.dirty());

        group.set_category(None, &mut ids);
        assert!(group.is_empty());
        assert_eq!(group.category(), None);
    }

    #[test]
    fn remove_by_id() {
        let mut group = NodeAnnotations::default();
        group.load(&sample()).unwrap();
        assert!(group.remove("a2"));
        assert!(!group.remove("a2"));
        assert_eq!(group.category(), None);
        assert!(group.dirty());
    }

    #[test]
    fn bad_category_is_parse_error() {
        let raw = json!({"annotations": [{"id": "x", "topicCategory": {"category": "SPORTS"}}]});
        let mut group = NodeAnnotations::default();
        assert!(matches!(group.load(&raw), Err(ModelError::Parse { .. })));
    }
}
