//! # keepsync sync engine
//!
//! Delta sync state machine for a keepsync mirror.
//!
//! This crate provides:
//! - Sync state machine (idle → sending → applying → idle)
//! - Truncated-page continuation bounded by a page limit
//! - Resync and upgrade signals surfaced as typed errors
//! - HTTP transport abstraction with token refresh
//! - In-memory and snapshot-file appliers
//!
//! ## Architecture
//!
//! Each page is one request/response exchange:
//! 1. Collect dirty nodes (and labels, if any changed) as clean saves
//! 2. Send them with the last confirmed version
//! 3. Apply the returned labels, then the node records
//! 4. Advance the version and persist
//!
//! The mirror stays locked for the whole cycle, so local edits cannot
//! interleave with the optimistic dirty clearing of step 1.
//!
//! ## Key Invariants
//!
//! - Sent entities are marked dirty again if the exchange fails
//! - `forceFullResync` and `upgradeRecommended` abort before any delta is applied
//! - Cancellation is honored only between pages

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod http;
mod snapshot_applier;
mod state;
mod transport;

pub use config::{RetryConfig, SyncConfig, DEFAULT_BASE_URL};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer, StaticToken, TokenProvider};
pub use snapshot_applier::SnapshotFileApplier;
pub use state::{MemorySyncApplier, SyncApplier, SyncCycleResult, SyncEngine, SyncState, SyncStats};
pub use transport::{MockTransport, SyncTransport};
