//! # plinth-bus
//!
//! Fan-out hub connecting the state stores to their subscribers.
//!
//! - **Bus**: [`EventBus`] assigns each published event a global sequence
//!   number, retains a bounded replay ring, and delivers to every matching
//!   subscription with a non-blocking bounded queue
//! - **Subscriptions**: [`Subscription`] handles with async `recv`,
//!   drop-deregistration, and explicit close reasons
//! - **Backpressure**: a subscription whose queue stays full for a
//!   configurable run of consecutive publishes is force-closed; other
//!   subscriptions and the publishing store are never affected
//!
//! ## Crate Position
//!
//! Depends on: plinth-core.
//! Depended on by: plinth-store, plinth-runtime.

#![deny(unsafe_code)]

pub mod bus;
pub mod config;
pub mod errors;
pub mod subscription;

// Re-export main public API
pub use bus::{BusStats, EventBus};
pub use config::BusConfig;
pub use errors::BusError;
pub use subscription::{CloseReason, Subscription, SubscriptionState};
