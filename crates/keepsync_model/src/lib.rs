//! # keepsync model
//!
//! Local data model of a Keep account mirror.
//!
//! This crate provides:
//! - The element save/load contract with dirty tracking
//! - Timestamps, settings, annotations, collaborators and blobs
//! - The node tree (root, notes, lists, list items, blobs) in an id-keyed arena
//! - The label registry and per-node label links
//! - Canonical list ordering, indent/dedent and sort-key placement
//! - Snapshots for resuming offline
//!
//! ## Key Invariants
//!
//! - Every node reachable from the root is registered, and vice versa
//! - A clean save clears the dirty bit; an unclean save records it
//! - A failed load leaves the element unchanged
//! - List items nest at most one level deep

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod annotations;
mod blob;
mod collaborators;
mod element;
mod error;
pub mod fields;
mod id;
mod labels;
mod list;
mod mirror;
mod node;
mod settings;
mod snapshot;
mod store;
pub mod timestamps;

pub use annotations::{Annotation, AnnotationKind, CategoryValue, NodeAnnotations, WebLink};
pub use blob::{BlobKind, NodeBlob, NodeDrawing, NodeDrawingInfo, NodeImage};
pub use collaborators::{Collaborator, NodeCollaborators, RoleValue, ShareRequestValue};
pub use element::Element;
pub use error::{ModelError, ModelResult};
pub use id::{now_millis, IdGenerator, SORT_SEED_MIN};
pub use labels::{Label, LabelApplyReport, LabelLink, LabelRegistry, NodeLabels};
pub use list::{ItemPlacement, SORT_DELTA, SORT_KEY_MAX, SORT_KEY_MIN};
pub use mirror::{Mirror, Outgoing, PageApplyReport, Query};
pub use node::{ColorValue, ListItemData, Node, NodeKind, NodeType, TopLevel, ROOT_ID};
pub use settings::{CheckedListItemsPolicy, GraveyardState, NewListItemPlacement, NodeSettings};
pub use snapshot::Snapshot;
pub use store::{ApplyReport, ConsistencyReport, NodeStore};
pub use timestamps::NodeTimestamps;
