//! Classifier: fingerprinting, deduplication, severity and cool-down.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use remedy_types::{Fault, FaultCategory, Fingerprint, Severity, Signal};
use tracing::{debug, info};

use crate::clock::to_chrono;

/// Detail substrings that escalate any fault to critical.
pub const CRITICAL_MARKERS: &[&str] = &[
    "critical",
    "fatal",
    "panic",
    "corrupt",
    "data loss",
    "out of memory",
];

/// Default severity of a category.
pub fn category_severity(category: FaultCategory) -> Severity {
    match category {
        FaultCategory::Storage | FaultCategory::Reachability => Severity::Critical,
        FaultCategory::Performance | FaultCategory::Security => Severity::High,
        FaultCategory::Build | FaultCategory::Unknown => Severity::Medium,
    }
}

/// Severity of a failing signal: the category default unless the detail
/// carries a critical marker.
pub fn severity_for(signal: &Signal) -> Severity {
    let detail = signal.detail.to_lowercase();
    if CRITICAL_MARKERS.iter().any(|m| detail.contains(m)) {
        Severity::Critical
    } else {
        category_severity(signal.category())
    }
}

/// Active and recently resolved faults, keyed by fingerprint.
#[derive(Debug, Clone, Default)]
pub struct FaultTable {
    active: BTreeMap<Fingerprint, Fault>,
    resolved: BTreeMap<Fingerprint, Fault>,
}

impl FaultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> impl Iterator<Item = &Fault> {
        self.active.values()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn resolved_len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_clear(&self) -> bool {
        self.active.is_empty()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&Fault> {
        self.active.get(fingerprint)
    }

    /// Owned copies of the active faults, most severe first.
    pub fn snapshot(&self) -> Vec<Fault> {
        let mut faults: Vec<Fault> = self.active.values().cloned().collect();
        faults.sort_by(|a, b| {
            a.severity
                .cmp(&b.severity)
                .then_with(|| a.first_seen.cmp(&b.first_seen))
        });
        faults
    }
}

/// A fault touched by a classification pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedFault {
    pub fault: Fault,
    /// Whether this detection should be alerted on.
    pub alert: bool,
}

/// Result of one classification pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// Faults created or refreshed, in order of first detection.
    pub updated: Vec<ClassifiedFault>,
    /// Faults that had no failing signal in this pass.
    pub cleared: Vec<Fault>,
}

impl Classification {
    /// Alert-worthy faults of this pass.
    pub fn alerts(&self) -> impl Iterator<Item = &Fault> {
        self.updated.iter().filter(|c| c.alert).map(|c| &c.fault)
    }

    /// All faults detected in this pass.
    pub fn faults(&self) -> Vec<Fault> {
        self.updated.iter().map(|c| c.fault.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.updated.is_empty()
    }
}

/// Folds detector signals into the [`FaultTable`].
///
/// Apart from the table it owns, classification is pure: time is passed in.
#[derive(Debug, Clone)]
pub struct Classifier {
    cooldown: Duration,
    fault_retention: Duration,
    table: FaultTable,
}

impl Classifier {
    pub fn new(cooldown: Duration, fault_retention: Duration) -> Self {
        Self {
            cooldown,
            fault_retention,
            table: FaultTable::new(),
        }
    }

    pub fn table(&self) -> &FaultTable {
        &self.table
    }

    pub fn active_faults(&self) -> Vec<Fault> {
        self.table.snapshot()
    }

    /// Classify one detector pass.
    pub fn classify(&mut self, signals: &[Signal], now: DateTime<Utc>) -> Classification {
        let cooldown = to_chrono(self.cooldown);
        let mut order: Vec<Fingerprint> = Vec::new();
        let mut alerting: BTreeSet<Fingerprint> = BTreeSet::new();

        for signal in signals.iter().filter(|s| s.is_failure()) {
            let fingerprint = Fingerprint::of_signal(signal);
            let severity = severity_for(signal);

            // Same fingerprint earlier in this pass: merge.
            if order.contains(&fingerprint) {
                if let Some(fault) = self.table.active.get_mut(&fingerprint) {
                    fault.observe(signal.clone(), severity, now);
                }
                continue;
            }
            order.push(fingerprint.clone());

            if let Some(fault) = self.table.active.get_mut(&fingerprint) {
                let within_cooldown = now - fault.last_seen <= cooldown;
                fault.observe(signal.clone(), severity, now);
                if !within_cooldown {
                    fault.last_alerted = now;
                    alerting.insert(fingerprint);
                }
                continue;
            }

            match self.table.resolved.remove(&fingerprint) {
                Some(mut fault) if now - fault.last_seen <= cooldown => {
                    debug!(fingerprint = %fingerprint.short(), "Fault recurred within cooldown");
                    fault.observe(signal.clone(), severity, now);
                    self.table.active.insert(fingerprint, fault);
                }
                _ => {
                    let fault = Fault::new(fingerprint.clone(), severity, signal.clone(), now);
                    self.table.active.insert(fingerprint.clone(), fault);
                    alerting.insert(fingerprint);
                }
            }
        }

        let stale: Vec<Fingerprint> = self
            .table
            .active
            .keys()
            .filter(|fp| !order.contains(fp))
            .cloned()
            .collect();
        let mut cleared = Vec::with_capacity(stale.len());
        for fingerprint in stale {
            if let Some(fault) = self.table.active.remove(&fingerprint) {
                info!(
                    fingerprint = %fingerprint.short(),
                    category = %fault.category,
                    "Fault cleared"
                );
                cleared.push(fault.clone());
                self.table.resolved.insert(fingerprint, fault);
            }
        }

        let retention = to_chrono(self.fault_retention);
        self.table
            .resolved
            .retain(|_, fault| now - fault.last_seen <= retention);

        let updated = order
            .into_iter()
            .filter_map(|fp| {
                let alert = alerting.contains(&fp);
                self.table
                    .active
                    .get(&fp)
                    .map(|fault| ClassifiedFault {
                        fault: fault.clone(),
                        alert,
                    })
            })
            .collect();

        Classification { updated, cleared }
    }
}
