//! Loop configuration.
//!
//! Controls cadence, safety thresholds, probe timeouts and history bounds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Configuration for one repair loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Delay between cycles while healthy.
    pub base_interval: Duration,

    /// Upper bound on the backoff delay.
    pub max_interval: Duration,

    /// Consecutive failed cycles that trigger an emergency stop.
    pub emergency_stop_threshold: u32,

    /// Consecutive clean cycles that complete the run.
    pub required_clean_cycles: u32,

    /// Hard ceiling on the number of cycles.
    pub max_cycles: u64,

    /// Time budget of each probe invocation.
    pub per_probe_timeout: Duration,

    /// Minimum time between alerts on the same fingerprint.
    pub cooldown: Duration,

    /// How long a resolved fault is remembered for deduplication.
    pub fault_retention: Duration,

    /// Verification passes that must agree before a repair is accepted.
    pub verify_passes: u32,

    /// Delay between verification passes.
    pub verify_interval: Duration,

    /// Delay between attempts of the same repair action.
    pub retry_delay: Duration,

    /// Cycle records kept in memory and in snapshots.
    pub history_limit: usize,

    /// Repair attempts kept in memory and in snapshots.
    pub attempt_history_limit: usize,

    /// Maximum repair attempts per dispatch.
    pub repair_attempt_budget: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(30),
            max_interval: Duration::from_secs(15 * 60),
            emergency_stop_threshold: 10,
            required_clean_cycles: 3,
            max_cycles: 1000,
            per_probe_timeout: Duration::from_secs(10),
            cooldown: Duration::from_secs(5 * 60),
            fault_retention: Duration::from_secs(60 * 60),
            verify_passes: 3,
            verify_interval: Duration::from_secs(2),
            retry_delay: Duration::from_secs(1),
            history_limit: 50,
            attempt_history_limit: 200,
            repair_attempt_budget: 64,
        }
    }
}

impl LoopConfig {
    /// Short intervals for tests and local development.
    pub fn for_testing() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            per_probe_timeout: Duration::from_millis(500),
            cooldown: Duration::from_secs(60),
            verify_interval: Duration::from_millis(10),
            retry_delay: Duration::from_millis(10),
            ..Self::default()
        }
    }

    /// Check that the values are mutually consistent.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.base_interval.is_zero() {
            return Err(ConfigError::invalid("base_interval", "must be non-zero"));
        }
        if self.max_interval < self.base_interval {
            return Err(ConfigError::invalid(
                "max_interval",
                "must not be shorter than base_interval",
            ));
        }
        if self.emergency_stop_threshold == 0 {
            return Err(ConfigError::invalid(
                "emergency_stop_threshold",
                "must be at least 1",
            ));
        }
        if self.required_clean_cycles == 0 {
            return Err(ConfigError::invalid(
                "required_clean_cycles",
                "must be at least 1",
            ));
        }
        if self.max_cycles == 0 {
            return Err(ConfigError::invalid("max_cycles", "must be at least 1"));
        }
        if self.per_probe_timeout.is_zero() {
            return Err(ConfigError::invalid("per_probe_timeout", "must be non-zero"));
        }
        if self.verify_passes == 0 {
            return Err(ConfigError::invalid("verify_passes", "must be at least 1"));
        }
        if self.repair_attempt_budget == 0 {
            return Err(ConfigError::invalid(
                "repair_attempt_budget",
                "must be at least 1",
            ));
        }

        // Streak counters are derived from the retained history.
        let needed = self.emergency_stop_threshold.max(self.required_clean_cycles) as usize;
        if self.history_limit < needed {
            return Err(ConfigError::invalid(
                "history_limit",
                format!("must hold at least {needed} cycles"),
            ));
        }

        Ok(())
    }
}
