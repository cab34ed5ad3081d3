//! # keepsync sync protocol
//!
//! Wire messages of the Keep `changes` endpoint.
//!
//! This crate provides:
//! - `ChangesRequest` with its `RequestHeader`
//! - `ChangesResponse` for one page of a server delta
//! - `ApiReply` for telling error envelopes from deltas
//! - JSON encoding/decoding
//!
//! Node and label records are carried as raw JSON documents; their
//! shape is owned by `keepsync_model`. This is a pure protocol crate with
//! no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ApiErrorBody, ApiReply, Capability, ChangesRequest, ChangesResponse, ClientVersion,
    RequestHeader, UserInfo, DEFAULT_CAPABILITIES,
};
