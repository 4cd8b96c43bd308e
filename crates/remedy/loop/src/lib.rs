//! # Remedy Loop
//!
//! Autonomous fault-detection-and-repair control loop.
//!
//! Each cycle the [`Controller`] runs the [`Detector`] over a [`ProbeSet`],
//! folds the signals into faults with the [`Classifier`], dispatches repair
//! actions through the [`RepairDispatcher`] when faults are present and
//! confirms the outcome with the [`Verifier`]. The inter-cycle delay backs
//! off exponentially while repairs fail; too many failed cycles in a row
//! end the run in an emergency stop.
//!
//! ## Example
//!
//! ```ignore
//! use remedy_loop::{Controller, LoopConfig, ProbeSet, HttpProbe};
//!
//! let probes = ProbeSet::new().with_probe(HttpProbe::new("api", "http://localhost:8080/health"));
//! let handle = Controller::builder(LoopConfig::default())
//!     .with_probes(probes)
//!     .build()?
//!     .spawn();
//!
//! let outcome = handle.join().await;
//! ```

pub mod backoff;
pub mod catalog;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod controller;
pub mod detector;
pub mod dispatcher;
pub mod effector;
pub mod error;
pub mod handle;
pub mod probes;
pub mod store;
pub mod verifier;

pub use backoff::BackoffPolicy;
pub use catalog::{ActionCatalog, DispatchPlan};
pub use classifier::{Classification, ClassifiedFault, Classifier, FaultTable};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LoopConfig;
pub use controller::{Controller, ControllerBuilder};
pub use detector::Detector;
pub use dispatcher::{
    ActionReport, ActionStatus, DispatchBudget, DispatchReport, RepairDispatcher, SkipReason,
};
pub use effector::{
    CommandEffector, CommandSpec, Effector, EffectorContext, EffectorOutput, EffectorRegistry,
};
pub use error::{
    CatalogError, ConfigError, EffectorError, LoopError, LoopResult, ProbeError, StoreError,
};
pub use handle::{ControlFlags, LoopHandle, StopSignal};
pub use probes::{
    FnProbe, HttpProbe, LatencyProbe, Probe, ProbeFactory, ProbeReading, ProbeSet,
    SecurityHeadersProbe, TcpProbe,
};
pub use store::{InMemoryStateStore, JsonFileStateStore, StateStore};
pub use verifier::Verifier;

pub use remedy_types;
