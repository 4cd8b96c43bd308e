//! Raw probe results.
//!
//! A [`Signal`] is what one probe invocation produced in one cycle. Signals
//! are immutable; the classifier folds failing ones into faults and healthy
//! ones are dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fault::FaultCategory;
use crate::ids::ProbeId;

/// Kind of health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// API / endpoint reachability.
    Reachability,
    /// Database or storage connectivity.
    Storage,
    /// Latency and throughput.
    Performance,
    /// Security posture (headers, TLS, exposure).
    Security,
    /// Build or deploy pipeline health.
    Build,
    /// Application-defined probe.
    Custom,
}

impl ProbeKind {
    /// Fault category a failing probe of this kind is filed under.
    pub fn category(&self) -> FaultCategory {
        match self {
            ProbeKind::Reachability => FaultCategory::Reachability,
            ProbeKind::Storage => FaultCategory::Storage,
            ProbeKind::Performance => FaultCategory::Performance,
            ProbeKind::Security => FaultCategory::Security,
            ProbeKind::Build => FaultCategory::Build,
            ProbeKind::Custom => FaultCategory::Unknown,
        }
    }
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeKind::Reachability => write!(f, "reachability"),
            ProbeKind::Storage => write!(f, "storage"),
            ProbeKind::Performance => write!(f, "performance"),
            ProbeKind::Security => write!(f, "security"),
            ProbeKind::Build => write!(f, "build"),
            ProbeKind::Custom => write!(f, "custom"),
        }
    }
}

/// Why a probe failed to execute at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    /// Probe exceeded its time budget.
    Timeout,
    /// Connection refused, reset or unresolvable.
    Connection,
    /// Remote answered with something unparseable.
    Protocol,
    /// Probe implementation error.
    Internal,
}

impl std::fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeErrorKind::Timeout => write!(f, "timeout"),
            ProbeErrorKind::Connection => write!(f, "connection"),
            ProbeErrorKind::Protocol => write!(f, "protocol"),
            ProbeErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Result of one probe invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Probe that produced this signal.
    pub probe_id: ProbeId,

    /// Kind of the probe.
    pub kind: ProbeKind,

    /// When the probe completed.
    pub timestamp: DateTime<Utc>,

    /// Whether the target was healthy.
    pub ok: bool,

    /// Probe round trip in milliseconds.
    pub latency_ms: u64,

    /// Human-readable status detail.
    pub detail: String,

    /// Set when the probe itself could not execute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProbeErrorKind>,
}

impl Signal {
    /// Create a healthy signal.
    pub fn healthy(
        probe_id: ProbeId,
        kind: ProbeKind,
        timestamp: DateTime<Utc>,
        latency_ms: u64,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            probe_id,
            kind,
            timestamp,
            ok: true,
            latency_ms,
            detail: detail.into(),
            error: None,
        }
    }

    /// Create a failing signal from a probe that ran but reported unhealthy.
    pub fn failing(
        probe_id: ProbeId,
        kind: ProbeKind,
        timestamp: DateTime<Utc>,
        latency_ms: u64,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            probe_id,
            kind,
            timestamp,
            ok: false,
            latency_ms,
            detail: detail.into(),
            error: None,
        }
    }

    /// Create a failing signal from a probe that could not execute.
    pub fn errored(
        probe_id: ProbeId,
        kind: ProbeKind,
        timestamp: DateTime<Utc>,
        latency_ms: u64,
        error: ProbeErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            probe_id,
            kind,
            timestamp,
            ok: false,
            latency_ms,
            detail: detail.into(),
            error: Some(error),
        }
    }

    /// Whether this signal indicates a problem.
    pub fn is_failure(&self) -> bool {
        !self.ok
    }

    /// Category this signal is filed under when it fails.
    pub fn category(&self) -> FaultCategory {
        self.kind.category()
    }
}
