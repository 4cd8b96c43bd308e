//! Classified, deduplicated problems.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::signal::Signal;

/// Maximum number of source signals retained on a fault.
pub const MAX_SOURCE_SIGNALS: usize = 8;

/// Category of a fault, resolved once from the probe kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCategory {
    Reachability,
    Storage,
    Performance,
    Security,
    Build,
    Unknown,
}

impl FaultCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultCategory::Reachability => "reachability",
            FaultCategory::Storage => "storage",
            FaultCategory::Performance => "performance",
            FaultCategory::Security => "security",
            FaultCategory::Build => "build",
            FaultCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a fault. Ordered most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// The more severe of two severities.
    pub fn escalate(self, other: Severity) -> Severity {
        self.min(other)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
            Severity::Low => write!(f, "low"),
        }
    }
}

/// Stable identifier used to merge repeated detections of the same fault.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a category and free-text detail.
    ///
    /// The detail is normalized first (see [`normalize_detail`]) so that
    /// detections differing only in counters, latencies or timestamps
    /// collapse onto one fingerprint.
    pub fn compute(category: FaultCategory, detail: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(category.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(normalize_detail(detail).as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Fingerprint of a signal.
    pub fn of_signal(signal: &Signal) -> Self {
        Self::compute(signal.category(), &signal.detail)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a detail string for fingerprinting.
///
/// Lowercases, replaces every run of ASCII digits with `#` and collapses
/// whitespace runs into a single space.
pub fn normalize_detail(detail: &str) -> String {
    let mut out = String::with_capacity(detail.len());
    let mut in_digits = false;
    let mut pending_space = false;

    for ch in detail.trim().chars() {
        if ch.is_whitespace() {
            pending_space = true;
            in_digits = false;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        if ch.is_ascii_digit() {
            if !in_digits {
                out.push('#');
                in_digits = true;
            }
            continue;
        }
        in_digits = false;
        out.extend(ch.to_lowercase());
    }

    out
}

/// An ongoing, classified problem derived from one or more signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    /// Deduplication key.
    pub fingerprint: Fingerprint,

    /// Category.
    pub category: FaultCategory,

    /// Severity.
    pub severity: Severity,

    /// First detection.
    pub first_seen: DateTime<Utc>,

    /// Most recent detection.
    pub last_seen: DateTime<Utc>,

    /// Most recent time this fault was reported as alert-worthy.
    pub last_alerted: DateTime<Utc>,

    /// Number of signals folded into this fault.
    pub occurrences: u64,

    /// Most recent source signals, oldest first.
    pub source_signals: Vec<Signal>,
}

impl Fault {
    /// Create a fault from its first failing signal.
    pub fn new(
        fingerprint: Fingerprint,
        severity: Severity,
        signal: Signal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            fingerprint,
            category: signal.category(),
            severity,
            first_seen: now,
            last_seen: now,
            last_alerted: now,
            occurrences: 1,
            source_signals: vec![signal],
        }
    }

    /// Fold another failing signal into this fault.
    pub fn observe(&mut self, signal: Signal, severity: Severity, now: DateTime<Utc>) {
        self.last_seen = now;
        self.occurrences += 1;
        self.severity = self.severity.escalate(severity);
        self.source_signals.push(signal);
        if self.source_signals.len() > MAX_SOURCE_SIGNALS {
            let excess = self.source_signals.len() - MAX_SOURCE_SIGNALS;
            self.source_signals.drain(..excess);
        }
    }

    /// Detail of the most recent source signal.
    pub fn latest_detail(&self) -> &str {
        self.source_signals
            .last()
            .map(|s| s.detail.as_str())
            .unwrap_or("")
    }
}
