//! # plinth-runtime
//!
//! The runtime facade: constructs and owns one [`plinth_bus::EventBus`],
//! one [`plinth_store::ContextStore`], one [`plinth_store::FileStore`],
//! and the background expiry sweeper.
//!
//! - [`Runtime::start`] wires everything from a [`RuntimeConfig`]
//! - [`Runtime::shutdown`] tears it down gracefully and idempotently
//! - [`Runtime::stats`] aggregates counters across all components
//!
//! ## Crate Position
//!
//! Top of the stack. Embedders depend on this crate and reach the
//! stores and bus through the [`Runtime`] accessors.

#![deny(unsafe_code)]

pub mod config;
pub mod runtime;

// Re-export main public API
pub use config::RuntimeConfig;
pub use runtime::{Runtime, RuntimeStats};
