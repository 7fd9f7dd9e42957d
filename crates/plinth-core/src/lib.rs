//! # plinth-core
//!
//! Shared vocabulary for the Plinth runtime state layer.
//!
//! - **Change events**: [`events::ChangeEvent`] describing one committed store
//!   mutation, with [`events::ResourceKind`], [`events::EventType`], and a
//!   small [`events::PayloadSummary`] snapshot
//! - **Filters**: [`events::EventFilter`] matched against kind and id prefix
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by plinth-bus, plinth-store, plinth-runtime.

#![deny(unsafe_code)]

pub mod events;

// Re-export main public API
pub use events::{ChangeEvent, EventFilter, EventType, PayloadSummary, ResourceKind};
