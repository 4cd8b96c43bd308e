//! Persisted state snapshot.
//!
//! The snapshot is the only contract external dashboards and CLIs rely on.
//! Field names and types must stay stable; bump [`SNAPSHOT_SCHEMA_VERSION`]
//! on any incompatible change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cycle::{CycleRecord, LoopState};
use crate::fault::Fault;
use crate::repair::RepairAttempt;

/// Current snapshot schema version.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Document written to the state store every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub state: LoopState,
    pub recent_cycles: Vec<CycleRecord>,
    pub active_faults: Vec<Fault>,
    pub recent_attempts: Vec<RepairAttempt>,
}

impl StateSnapshot {
    pub fn new(
        generated_at: DateTime<Utc>,
        state: LoopState,
        recent_cycles: Vec<CycleRecord>,
        active_faults: Vec<Fault>,
        recent_attempts: Vec<RepairAttempt>,
    ) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            generated_at,
            state,
            recent_cycles,
            active_faults,
            recent_attempts,
        }
    }

    /// Snapshot of a loop that has not run yet.
    pub fn initial(generated_at: DateTime<Utc>, state: LoopState) -> Self {
        Self::new(generated_at, state, Vec::new(), Vec::new(), Vec::new())
    }

    /// Most recent cycle record.
    pub fn last_cycle(&self) -> Option<&CycleRecord> {
        self.recent_cycles.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::RunId;

    #[test]
    fn test_snapshot_field_names_are_stable() {
        let snapshot = StateSnapshot::initial(Utc::now(), LoopState::new(RunId::generate()));
        let json = serde_json::to_value(&snapshot).unwrap();

        for key in [
            "schema_version",
            "generated_at",
            "state",
            "recent_cycles",
            "active_faults",
            "recent_attempts",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        for key in [
            "phase",
            "current_cycle",
            "consecutive_failures",
            "consecutive_clean_cycles",
            "emergency_stopped",
            "pause_requested",
        ] {
            assert!(json["state"].get(key).is_some(), "missing state.{}", key);
        }
        assert_eq!(json["state"]["phase"], "idle");
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let snapshot = StateSnapshot::initial(Utc::now(), LoopState::new(RunId::generate()));
        let text = serde_json::to_string(&snapshot).unwrap();
        let back: StateSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(back, snapshot);
    }
}
