//! # keepsync testkit
//!
//! Test utilities for keepsync.
//!
//! This crate provides:
//! - `FakeKeepServer`, an in-memory changes endpoint
//! - Record builders and seeded mirrors
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keepsync_testkit::prelude::*;
//!
//! #[test]
//! fn sync_against_fake_server() {
//!     init_tracing();
//!     let server = FakeKeepServer::new().with_page_size(2);
//!     server.put_node(NodeRecord::note("n1").title("remote").build());
//!     // ... run a sync engine against the server
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::server::*;
}

pub use fixtures::*;
pub use generators::*;
pub use server::*;
