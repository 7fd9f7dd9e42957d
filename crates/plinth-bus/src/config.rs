//! Event bus configuration.

use serde::{Deserialize, Serialize};

/// Delivery and retention tunables for the event bus.
///
/// Implements [`Default`] with production values; `#[serde(default)]` allows
/// partial JSON, with missing fields taking their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusConfig {
    /// Capacity of each subscription's delivery queue.
    pub queue_capacity: usize,
    /// Number of recent events retained for replay on resubscribe.
    pub replay_capacity: usize,
    /// Consecutive full-queue publishes before a subscription is
    /// force-closed.
    pub slow_consumer_threshold: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            replay_capacity: 1024,
            slow_consumer_threshold: 100,
        }
    }
}

impl BusConfig {
    /// Clamp zero capacities and thresholds to 1.
    ///
    /// Called automatically when a bus is constructed. Out-of-range values
    /// are corrected with a warning rather than rejected.
    pub fn validate(&mut self) {
        if self.queue_capacity == 0 {
            tracing::warn!("queue_capacity of 0 clamped to 1");
            self.queue_capacity = 1;
        }
        if self.replay_capacity == 0 {
            tracing::warn!("replay_capacity of 0 clamped to 1");
            self.replay_capacity = 1;
        }
        if self.slow_consumer_threshold == 0 {
            tracing::warn!("slow_consumer_threshold of 0 clamped to 1");
            self.slow_consumer_threshold = 1;
        }
    }
}
