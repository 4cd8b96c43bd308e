//! Repair action descriptors and attempt records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fault::FaultCategory;
use crate::ids::ActionId;

/// Maximum length of a recorded effector output excerpt, in characters.
pub const OUTPUT_EXCERPT_LIMIT: usize = 512;

/// Priority of a repair action. Ordered most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Configuration-owned descriptor of a repair action.
///
/// The loop only ever reads these to build a dispatch plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairAction {
    /// Unique action identifier.
    pub id: ActionId,

    /// Fault category this action repairs.
    pub category: FaultCategory,

    /// Execution priority within a dependency tier.
    pub priority: Priority,

    /// Name of the effector that performs the repair.
    pub effector: String,

    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,

    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Actions that must succeed before this one runs.
    #[serde(default)]
    pub depends_on: Vec<ActionId>,
}

impl RepairAction {
    /// Create an action with no dependencies.
    pub fn new(
        id: impl Into<String>,
        category: FaultCategory,
        priority: Priority,
        effector: impl Into<String>,
    ) -> Self {
        Self {
            id: ActionId::new(id),
            category,
            priority,
            effector: effector.into(),
            timeout_ms: 30_000,
            max_retries: 2,
            depends_on: Vec::new(),
        }
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Add a dependency.
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(ActionId::new(id));
        self
    }

    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Outcome of a single repair attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
    Timeout,
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Success => write!(f, "success"),
            AttemptOutcome::Failure => write!(f, "failure"),
            AttemptOutcome::Timeout => write!(f, "timeout"),
        }
    }
}

/// Record of one execution attempt of a repair action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairAttempt {
    pub action_id: ActionId,
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub output_excerpt: String,
}

impl RepairAttempt {
    pub fn new(
        action_id: ActionId,
        attempt_number: u32,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        outcome: AttemptOutcome,
        output: &str,
    ) -> Self {
        Self {
            action_id,
            attempt_number,
            started_at,
            ended_at,
            outcome,
            output_excerpt: excerpt(output),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

/// Truncate effector output to [`OUTPUT_EXCERPT_LIMIT`] characters.
pub fn excerpt(output: &str) -> String {
    let trimmed = output.trim();
    match trimmed.char_indices().nth(OUTPUT_EXCERPT_LIMIT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
