//! Runtime configuration.

use std::time::Duration;

use plinth_bus::BusConfig;
use serde::{Deserialize, Serialize};

/// Top-level runtime tuning knobs.
///
/// Every field has a serde default, so a config document only needs
/// the values it overrides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// How often the expiry sweeper runs, in milliseconds.
    pub sweep_interval_ms: u64,
    /// Event bus tuning.
    pub bus: BusConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 60_000,
            bus: BusConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Sweep cadence as a [`Duration`].
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Clamp out-of-range values to usable ones, logging each
    /// adjustment.
    pub fn validate(&mut self) {
        if self.sweep_interval_ms == 0 {
            tracing::warn!("sweepIntervalMs must be at least 1, clamping");
            self.sweep_interval_ms = 1;
        }
        self.bus.validate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.sweep_interval_ms, 60_000);
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.bus, BusConfig::default());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"sweepIntervalMs": 500, "bus": {"queueCapacity": 8}}"#)
                .unwrap();
        assert_eq!(config.sweep_interval_ms, 500);
        assert_eq!(config.bus.queue_capacity, 8);
        assert_eq!(config.bus.replay_capacity, BusConfig::default().replay_capacity);
    }

    #[test]
    fn validate_clamps_zero_interval() {
        let mut config = RuntimeConfig {
            sweep_interval_ms: 0,
            ..RuntimeConfig::default()
        };
        config.validate();
        assert_eq!(config.sweep_interval_ms, 1);
    }

    #[test]
    fn validate_keeps_sane_values() {
        let mut config = RuntimeConfig::default();
        config.validate();
        assert_eq!(config, RuntimeConfig::default());
    }
}
