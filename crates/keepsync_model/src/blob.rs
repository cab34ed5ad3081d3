//! Attachment metadata carried by blob nodes.
//!
//! Only references are tracked; media bytes are never transferred.

use crate::element::Element;
use crate::error::{ModelError, ModelResult};
use crate::fields::{finish_save, object, opt_bool, opt_i64, opt_str, read_dirty, req_str, required};
use crate::timestamps::{epoch, str_to_dt};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::warn;

const DRAWING_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Image metadata, shared by images and drawing snapshots.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeImage {
    /// Whether the upload finished.
    pub is_uploaded: bool,
    /// Width in pixels.
    pub width: i64,
    /// Height in pixels.
    pub height: i64,
    /// Size in bytes.
    pub byte_size: i64,
    /// OCR text.
    pub extracted_text: String,
    /// OCR status.
    pub extraction_status: String,
}

/// Drawing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDrawingInfo {
    /// Drawing id.
    pub drawing_id: String,
    /// Rendered snapshot of the drawing.
    pub snapshot: Box<NodeBlob>,
    /// Snapshot fingerprint.
    pub snapshot_fingerprint: String,
    /// When the thumbnail was rendered.
    pub thumbnail_generated_time: DateTime<Utc>,
    /// Ink reference.
    pub ink_hash: String,
    /// Snapshot proto fingerprint.
    pub snapshot_proto_fprint: String,
}

/// Drawing attachment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeDrawing {
    /// OCR text.
    pub extracted_text: String,
    /// OCR status.
    pub extraction_status: String,
    /// Drawing info, if the server sent it.
    pub info: Option<NodeDrawingInfo>,
}

/// Format-specific attachment metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum BlobKind {
    /// Voice recording.
    Audio {
        /// Length in seconds.
        length: i64,
    },
    /// Photo.
    Image(NodeImage),
    /// Drawing.
    Drawing(NodeDrawing),
}

impl BlobKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobKind::Audio { .. } => "audio",
            BlobKind::Image(_) => "image",
            BlobKind::Drawing(_) => "drawing",
        }
    }

    fn empty(type_name: &str) -> Option<Self> {
        match type_name.to_ascii_lowercase().as_str() {
            "audio" => Some(BlobKind::Audio { length: 0 }),
            "image" => Some(BlobKind::Image(NodeImage::default())),
            "drawing" => Some(BlobKind::Drawing(NodeDrawing::default())),
            _ => None,
        }
    }
}

/// The attachment wrapped by a blob node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeBlob {
    /// Blob id.
    pub blob_id: Option<String>,
    /// Media id.
    pub media_id: Option<String>,
    /// MIME type.
    pub mime_type: String,
    /// Format-specific metadata.
    pub kind: BlobKind,
    dirty: bool,
}

impl NodeBlob {
    /// Creates an empty blob of the given kind.
    pub fn new(kind: BlobKind) -> Self {
        Self {
            blob_id: None,
            media_id: None,
            mime_type: String::new(),
            kind,
            dirty: false,
        }
    }

    /// Decodes a blob. Unknown blob types yield `Ok(None)`.
    pub fn from_json(raw: &Value) -> ModelResult<Option<Self>> {
        let type_name = req_str(raw, "type")?;
        let Some(kind) = BlobKind::empty(&type_name) else {
            warn!(blob_type = %type_name, "unknown blob type");
            return Ok(None);
        };
        let mut blob = Self::new(kind);
        blob.load(raw)?;
        Ok(Some(blob))
    }
}

fn load_image(raw: &Value, image: &mut NodeImage) -> ModelResult<()> {
    image.is_uploaded = opt_bool(raw, "is_uploaded").unwrap_or(false);
    image.width = opt_i64(raw, "width")?.unwrap_or(0);
    image.height = opt_i64(raw, "height")?.unwrap_or(0);
    image.byte_size = opt_i64(raw, "byte_size")?.unwrap_or(0);
    image.extracted_text = opt_str(raw, "extracted_text").unwrap_or_default();
    image.extraction_status = opt_str(raw, "extraction_status").unwrap_or_default();
    Ok(())
}

fn load_drawing_info(raw: &Value) -> ModelResult<NodeDrawingInfo> {
    object(raw, "drawingInfo")?;
    let snapshot_raw = required(raw, "snapshotData")?;
    let snapshot = match NodeBlob::from_json(snapshot_raw)? {
        Some(blob) => blob,
        None => return Err(ModelError::parse("unknown snapshot type", snapshot_raw)),
    };
    let thumbnail_generated_time = match opt_str(raw, "thumbnailGeneratedTime") {
        Some(s) => str_to_dt(&s)
            .ok_or_else(|| ModelError::parse("bad thumbnailGeneratedTime", raw))?,
        None => epoch(),
    };
    Ok(NodeDrawingInfo {
        drawing_id: req_str(raw, "drawingId")?,
        snapshot: Box::new(snapshot),
        snapshot_fingerprint: opt_str(raw, "snapshotFingerprint").unwrap_or_default(),
        thumbnail_generated_time,
        ink_hash: opt_str(raw, "inkHash").unwrap_or_default(),
        snapshot_proto_fprint: opt_str(raw, "snapshotProtoFprint").unwrap_or_default(),
    })
}

impl Element for NodeBlob {
    fn load(&mut self, raw: &Value) -> ModelResult<()> {
        object(raw, "blob")?;
        let type_name = req_str(raw, "type")?;
        let mut kind = BlobKind::empty(&type_name)
            .ok_or_else(|| ModelError::parse(format!("unknown blob type {type_name}"), raw))?;

        match &mut kind {
            BlobKind::Audio { length } => {
                *length = opt_i64(raw, "length")?.unwrap_or(0);
            }
            BlobKind::Image(image) => load_image(raw, image)?,
            BlobKind::Drawing(drawing) => {
                drawing.extracted_text = opt_str(raw, "extracted_text").unwrap_or_default();
                drawing.extraction_status = opt_str(raw, "extraction_status").unwrap_or_default();
                drawing.info = match raw.get("drawingInfo") {
                    Some(info) if !info.is_null() => Some(load_drawing_info(info)?),
                    _ => None,
                };
            }
        }

        self.blob_id = opt_str(raw, "blob_id");
        self.media_id = opt_str(raw, "media_id");
        self.mime_type = opt_str(raw, "mimetype").unwrap_or_default();
        self.kind = kind;
        self.dirty = read_dirty(raw);
        Ok(())
    }

    fn save(&mut self, clean: bool) -> Value {
        let mut map = Map::new();
        map.insert("kind".into(), Value::from("notes#blob"));
        map.insert("type".into(), Value::from(self.kind.as_str()));
        if let Some(blob_id) = &self.blob_id {
            map.insert("blob_id".into(), Value::from(blob_id.clone()));
        }
        if let Some(media_id) = &self.media_id {
            map.insert("media_id".into(), Value::from(media_id.clone()));
        }
        map.insert("mimetype".into(), Value::from(self.mime_type.clone()));

        match &mut self.kind {
            BlobKind::Audio { length } => {
                map.insert("length".into(), Value::from(*length));
            }
            BlobKind::Image(image) => {
                map.insert("is_uploaded".into(), Value::from(image.is_uploaded));
                map.insert("width".into(), Value::from(image.width));
                map.insert("height".into(), Value::from(image.height));
                map.insert("byte_size".into(), Value::from(image.byte_size));
                map.insert(
                    "extracted_text".into(),
                    Value::from(image.extracted_text.clone()),
                );
                map.insert(
                    "extraction_status".into(),
                    Value::from(image.extraction_status.clone()),
                );
            }
            BlobKind::Drawing(drawing) => {
                map.insert(
                    "extracted_text".into(),
                    Value::from(drawing.extracted_text.clone()),
                );
                map.insert(
                    "extraction_status".into(),
                    Value::from(drawing.extraction_status.clone()),
                );
                if let Some(info) = &mut drawing.info {
                    let mut info_map = Map::new();
                    info_map.insert("drawingId".into(), Value::from(info.drawing_id.clone()));
                    info_map.insert("snapshotData".into(), info.snapshot.save(clean));
                    info_map.insert(
                        "snapshotFingerprint".into(),
                        Value::from(info.snapshot_fingerprint.clone()),
                    );
                    info_map.insert(
                        "thumbnailGeneratedTime".into(),
                        Value::from(
                            info.thumbnail_generated_time
                                .format(DRAWING_TIME_FORMAT)
                                .to_string(),
                        ),
                    );
                    info_map.insert("inkHash".into(), Value::from(info.ink_hash.clone()));
                    info_map.insert(
                        "snapshotProtoFprint".into(),
                        Value::from(info.snapshot_proto_fprint.clone()),
                    );
                    map.insert("drawingInfo".into(), Value::Object(info_map));
                }
            }
        }
        finish_save(map, &mut self.dirty, clean)
    }

    fn dirty(&self) -> bool {
        self.dirty
    }
}
