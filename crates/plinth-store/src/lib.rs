//! # plinth-store
//!
//! In-memory state stores shared by every runtime consumer:
//!
//! - [`ContextStore`]: keyed JSON values with versions, optional TTL
//!   expiry, and prefix listing
//! - [`FileStore`]: append-only, gapless version chains of file content
//!   keyed by logical path
//! - [`sweep`]: the background task that reaps expired context entries
//!
//! Every successful mutation publishes a [`plinth_core::ChangeEvent`]
//! on the bus handle the store was built with, while the per-resource
//! lock is still held, so subscribers observe each key and path in
//! mutation order.
//!
//! ## Crate Position
//!
//! Sits above `plinth-core` and `plinth-bus`. `plinth-runtime` owns the
//! store instances and wires the sweeper to its shutdown signal.

#![deny(unsafe_code)]

pub mod context;
pub mod errors;
pub mod file;
pub mod sweep;

// Re-export main public API
pub use context::{BulkSetItem, BulkSetResult, ContextEntry, ContextStats, ContextStore};
pub use errors::StoreError;
pub use file::{FileStats, FileStore, FileVersion, FileVersionInfo, PathSummary};
