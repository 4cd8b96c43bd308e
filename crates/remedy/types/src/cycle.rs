//! Loop state and per-cycle records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::RunId;

/// Phase of the repair loop state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Idle,
    Detecting,
    Repairing,
    Verifying,
    Backoff,
    EmergencyStopped,
    Completed,
    Exhausted,
    Stopped,
}

impl LoopPhase {
    /// Whether the loop can no longer advance from this phase.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopPhase::EmergencyStopped
                | LoopPhase::Completed
                | LoopPhase::Exhausted
                | LoopPhase::Stopped
        )
    }
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopPhase::Idle => write!(f, "idle"),
            LoopPhase::Detecting => write!(f, "detecting"),
            LoopPhase::Repairing => write!(f, "repairing"),
            LoopPhase::Verifying => write!(f, "verifying"),
            LoopPhase::Backoff => write!(f, "backoff"),
            LoopPhase::EmergencyStopped => write!(f, "emergency_stopped"),
            LoopPhase::Completed => write!(f, "completed"),
            LoopPhase::Exhausted => write!(f, "exhausted"),
            LoopPhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// How a loop run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopOutcome {
    /// Required number of clean cycles reached.
    Completed,
    /// Safety stop: repairs not converging or fatal error.
    EmergencyStopped { reason: String },
    /// Cycle ceiling reached without stabilizing.
    Exhausted,
    /// Stopped by an operator.
    Stopped,
}

impl LoopOutcome {
    /// Terminal phase matching this outcome.
    pub fn phase(&self) -> LoopPhase {
        match self {
            LoopOutcome::Completed => LoopPhase::Completed,
            LoopOutcome::EmergencyStopped { .. } => LoopPhase::EmergencyStopped,
            LoopOutcome::Exhausted => LoopPhase::Exhausted,
            LoopOutcome::Stopped => LoopPhase::Stopped,
        }
    }
}

/// Summary of one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle_number: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub faults_detected: usize,
    pub repairs_attempted: usize,
    pub repairs_succeeded: usize,
    /// `None` when no repair ran and nothing needed verifying.
    pub verification_passed: Option<bool>,
    /// A critical-priority action exhausted its retries.
    #[serde(default)]
    pub dispatch_aborted: bool,
    pub next_delay_ms: u64,
}

impl CycleRecord {
    /// Whether this cycle counts towards stabilization.
    pub fn is_clean(&self) -> bool {
        self.faults_detected == 0 || self.verification_passed == Some(true)
    }
}

/// Authoritative mutable record of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopState {
    pub run_id: RunId,
    pub phase: LoopPhase,
    pub current_cycle: u64,
    pub consecutive_failures: u32,
    pub consecutive_clean_cycles: u32,
    pub emergency_stopped: bool,
    pub pause_requested: bool,
    #[serde(default)]
    pub outcome: Option<LoopOutcome>,
}

impl LoopState {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            phase: LoopPhase::Idle,
            current_cycle: 0,
            consecutive_failures: 0,
            consecutive_clean_cycles: 0,
            emergency_stopped: false,
            pause_requested: false,
            outcome: None,
        }
    }

    /// Move to a terminal outcome.
    pub fn finish(&mut self, outcome: LoopOutcome) {
        self.phase = outcome.phase();
        self.emergency_stopped = matches!(outcome, LoopOutcome::EmergencyStopped { .. });
        self.outcome = Some(outcome);
    }

    /// Recompute the streak counters from the cycle history, newest last.
    ///
    /// Only the trailing run of same-kind cycles counts, so at most one of
    /// the two counters is non-zero.
    pub fn derive_counters<'a, I>(&mut self, history: I)
    where
        I: DoubleEndedIterator<Item = &'a CycleRecord>,
    {
        let mut iter = history.rev().peekable();
        let clean = match iter.peek() {
            Some(last) => last.is_clean(),
            None => {
                self.consecutive_failures = 0;
                self.consecutive_clean_cycles = 0;
                return;
            }
        };
        let streak = iter.take_while(|r| r.is_clean() == clean).count() as u32;

        if clean {
            self.consecutive_clean_cycles = streak;
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = streak;
            self.consecutive_clean_cycles = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cycle: u64, faults: usize, verified: Option<bool>) -> CycleRecord {
        let now = Utc::now();
        CycleRecord {
            cycle_number: cycle,
            started_at: now,
            ended_at: now,
            faults_detected: faults,
            repairs_attempted: 0,
            repairs_succeeded: 0,
            verification_passed: verified,
            dispatch_aborted: false,
            next_delay_ms: 0,
        }
    }

    #[test]
    fn test_clean_cycle_rules() {
        assert!(record(1, 0, None).is_clean());
        assert!(record(1, 2, Some(true)).is_clean());
        assert!(!record(1, 2, Some(false)).is_clean());
    }

    #[test]
    fn test_derive_counters_trailing_streak() {
        let history = vec![
            record(1, 1, Some(false)),
            record(2, 0, None),
            record(3, 0, None),
        ];
        let mut state = LoopState::new(RunId::generate());
        state.derive_counters(history.iter());
        assert_eq!(state.consecutive_clean_cycles, 2);
        assert_eq!(state.consecutive_failures, 0);

        let history = vec![
            record(1, 0, None),
            record(2, 1, Some(false)),
            record(3, 3, Some(false)),
        ];
        state.derive_counters(history.iter());
        assert_eq!(state.consecutive_clean_cycles, 0);
        assert_eq!(state.consecutive_failures, 2);
    }

    #[test]
    fn test_finish_sets_terminal_phase() {
        let mut state = LoopState::new(RunId::generate());
        state.finish(LoopOutcome::EmergencyStopped {
            reason: "snapshot write failed".into(),
        });
        assert_eq!(state.phase, LoopPhase::EmergencyStopped);
        assert!(state.emergency_stopped);
        assert!(state.phase.is_terminal());
    }
}
