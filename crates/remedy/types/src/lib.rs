//! # Remedy Types
//!
//! Data model of the Remedy fault-detection-and-repair loop.
//!
//! - [`Signal`]: raw result of one probe invocation
//! - [`Fault`]: deduplicated, classified ongoing problem
//! - [`RepairAction`] / [`RepairAttempt`]: catalog entries and execution records
//! - [`CycleRecord`] / [`LoopState`]: controller bookkeeping
//! - [`StateSnapshot`]: the persisted document read by operational tooling

pub mod cycle;
pub mod fault;
pub mod ids;
pub mod repair;
pub mod signal;
pub mod snapshot;

pub use cycle::{CycleRecord, LoopOutcome, LoopPhase, LoopState};
pub use fault::{normalize_detail, Fault, FaultCategory, Fingerprint, Severity};
pub use ids::{ActionId, ProbeId, RunId};
pub use repair::{AttemptOutcome, Priority, RepairAction, RepairAttempt};
pub use signal::{ProbeErrorKind, ProbeKind, Signal};
pub use snapshot::{StateSnapshot, SNAPSHOT_SCHEMA_VERSION};
