//! The repair loop controller.
//!
//! Owns the state machine, the active-fault table and the cycle history.
//! One cycle is in flight at a time and [`LoopState`] has a single writer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use remedy_types::{
    CycleRecord, LoopOutcome, LoopPhase, LoopState, RepairAttempt, RunId, StateSnapshot,
};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::backoff::BackoffPolicy;
use crate::catalog::ActionCatalog;
use crate::classifier::Classifier;
use crate::clock::{Clock, SystemClock};
use crate::config::LoopConfig;
use crate::detector::Detector;
use crate::dispatcher::{DispatchBudget, RepairDispatcher};
use crate::effector::EffectorRegistry;
use crate::error::{LoopError, LoopResult, StoreResult};
use crate::handle::{ControlFlags, LoopHandle, StopSignal};
use crate::probes::ProbeSet;
use crate::store::{InMemoryStateStore, StateStore};
use crate::verifier::Verifier;

/// Builder for a [`Controller`].
pub struct ControllerBuilder {
    config: LoopConfig,
    probes: Option<ProbeSet>,
    catalog: Option<ActionCatalog>,
    effectors: Option<EffectorRegistry>,
    store: Option<Arc<dyn StateStore>>,
    clock: Option<Arc<dyn Clock>>,
    run_id: Option<RunId>,
}

impl ControllerBuilder {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            probes: None,
            catalog: None,
            effectors: None,
            store: None,
            clock: None,
            run_id: None,
        }
    }

    /// Set the probes run every cycle
    pub fn with_probes(mut self, probes: ProbeSet) -> Self {
        self.probes = Some(probes);
        self
    }

    /// Set the repair action catalog
    pub fn with_catalog(mut self, catalog: ActionCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Set the effectors referenced by the catalog
    pub fn with_effectors(mut self, effectors: EffectorRegistry) -> Self {
        self.effectors = Some(effectors);
        self
    }

    /// Set the snapshot store (defaults to in-memory)
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the clock (defaults to [`SystemClock`])
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a fixed run id
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn build(self) -> LoopResult<Controller> {
        self.config.validate()?;

        let probes = self.probes.ok_or(LoopError::MissingComponent("probes"))?;
        let catalog = self.catalog.unwrap_or_default();
        let effectors = self.effectors.unwrap_or_default();
        catalog.validate_effectors(&effectors)?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStateStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let config = self.config;

        let detector = Detector::new(clock.clone(), config.per_probe_timeout);
        let verifier = Verifier::new(
            detector.clone(),
            clock.clone(),
            config.verify_passes,
            config.verify_interval,
        );
        let state = LoopState::new(self.run_id.unwrap_or_else(RunId::generate));
        let (control_tx, control_rx) = watch::channel(ControlFlags::default());
        let stop = StopSignal::new(control_rx.clone());
        let dispatcher = RepairDispatcher::new(effectors, clock.clone(), config.retry_delay)
            .with_stop_signal(stop.clone());
        let (status_tx, _) = watch::channel(StateSnapshot::initial(clock.now(), state.clone()));

        Ok(Controller {
            classifier: Classifier::new(config.cooldown, config.fault_retention),
            backoff: BackoffPolicy::new(config.base_interval, config.max_interval),
            next_delay: config.base_interval,
            history: VecDeque::with_capacity(config.history_limit),
            attempts: VecDeque::with_capacity(config.attempt_history_limit),
            config,
            probes,
            catalog,
            detector,
            dispatcher,
            verifier,
            store,
            clock,
            state,
            control_tx: Arc::new(control_tx),
            control_rx,
            stop,
            status_tx: Arc::new(status_tx),
        })
    }
}

/// The repair loop.
pub struct Controller {
    config: LoopConfig,
    probes: ProbeSet,
    catalog: ActionCatalog,
    detector: Detector,
    classifier: Classifier,
    dispatcher: RepairDispatcher,
    verifier: Verifier,
    backoff: BackoffPolicy,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    state: LoopState,
    next_delay: Duration,
    history: VecDeque<CycleRecord>,
    attempts: VecDeque<RepairAttempt>,
    control_tx: Arc<watch::Sender<ControlFlags>>,
    control_rx: watch::Receiver<ControlFlags>,
    stop: StopSignal,
    status_tx: Arc<watch::Sender<StateSnapshot>>,
}

impl Controller {
    pub fn builder(config: LoopConfig) -> ControllerBuilder {
        ControllerBuilder::new(config)
    }

    pub fn run_id(&self) -> RunId {
        self.state.run_id
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// Handle for controlling the loop from other tasks.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle::new(self.control_tx.clone(), self.status_tx.subscribe())
    }

    /// Run the loop on a new task.
    ///
    /// A panic inside the loop ends the run in `EmergencyStopped`; the
    /// last published snapshot is marked and persisted.
    pub fn spawn(self) -> LoopHandle {
        let handle = self.handle();
        let store = self.store.clone();
        let clock = self.clock.clone();
        let status_tx = self.status_tx.clone();
        let run_id = self.state.run_id;

        tokio::spawn(async move {
            match tokio::spawn(self.run()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let reason = if e.is_panic() {
                        "repair loop panicked".to_string()
                    } else {
                        "repair loop task cancelled".to_string()
                    };
                    error!(run_id = %run_id, error = %e, "Repair loop terminated abnormally");

                    let outcome = LoopOutcome::EmergencyStopped { reason };
                    let mut snapshot = status_tx.borrow().clone();
                    snapshot.state.finish(outcome.clone());
                    snapshot.generated_at = clock.now();
                    if let Err(e) = store.save(&snapshot).await {
                        error!(error = %e, "Failed to persist emergency snapshot");
                    }
                    status_tx.send_replace(snapshot);
                    outcome
                }
            }
        });

        handle
    }

    /// Drive the loop to a terminal outcome on the current task.
    #[instrument(skip(self), fields(run_id = %self.state.run_id))]
    pub async fn run(mut self) -> LoopOutcome {
        info!(
            probes = self.probes.len(),
            actions = self.catalog.len(),
            "Repair loop started"
        );

        loop {
            if self.control_rx.borrow().stop {
                return self.finish(LoopOutcome::Stopped).await;
            }
            if let Some(outcome) = self.run_cycle().await {
                return self.finish(outcome).await;
            }
            if let Some(outcome) = self.wait_for_next_cycle().await {
                return self.finish(outcome).await;
            }
        }
    }

    /// One detect / repair / verify cycle. Returns a terminal outcome if
    /// the cycle ended the run.
    ///
    /// A stop request abandons the cycle at its current wait point; the
    /// interrupted cycle is not recorded in the history.
    async fn run_cycle(&mut self) -> Option<LoopOutcome> {
        let cycle = self.state.current_cycle + 1;
        self.state.current_cycle = cycle;
        let started_at = self.clock.now();
        self.set_phase(LoopPhase::Detecting);

        let mut stop = self.stop.clone();
        let signals = tokio::select! {
            biased;
            _ = stop.stopped() => None,
            signals = self.detector.detect(&self.probes) => Some(signals),
        };
        let Some(signals) = signals else {
            info!(cycle, "Stop requested during detection");
            return Some(LoopOutcome::Stopped);
        };
        let classification = self.classifier.classify(&signals, self.clock.now());
        for fault in classification.alerts() {
            warn!(
                cycle,
                fingerprint = %fault.fingerprint.short(),
                category = %fault.category,
                severity = %fault.severity,
                detail = %fault.latest_detail(),
                "Fault detected"
            );
        }
        let faults = classification.faults();

        let mut record = CycleRecord {
            cycle_number: cycle,
            started_at,
            ended_at: started_at,
            faults_detected: faults.len(),
            repairs_attempted: 0,
            repairs_succeeded: 0,
            verification_passed: None,
            dispatch_aborted: false,
            next_delay_ms: 0,
        };

        // A pass with no faults is clean without verification.
        if !faults.is_empty() {
            self.set_phase(LoopPhase::Repairing);
            let report = self
                .dispatcher
                .dispatch(
                    &faults,
                    &self.catalog,
                    DispatchBudget::new(self.config.repair_attempt_budget),
                )
                .await;
            for attempt in report.attempts() {
                self.attempts.push_back(attempt.clone());
            }
            while self.attempts.len() > self.config.attempt_history_limit {
                self.attempts.pop_front();
            }
            record.repairs_attempted = report.attempted();
            record.repairs_succeeded = report.succeeded();
            record.dispatch_aborted = report.is_aborted();
            if let Some(action_id) = &report.aborted_by {
                warn!(cycle, action_id = %action_id, "Dispatch aborted, repair not converging");
            }
            if report.is_stopped() {
                info!(cycle, "Stop requested during repair");
                return Some(LoopOutcome::Stopped);
            }

            self.set_phase(LoopPhase::Verifying);
            let passed = tokio::select! {
                biased;
                _ = stop.stopped() => None,
                passed = self.verifier.confirm(&self.probes, &mut self.classifier) => Some(passed),
            };
            let Some(passed) = passed else {
                info!(cycle, "Stop requested during verification");
                return Some(LoopOutcome::Stopped);
            };
            record.verification_passed = Some(passed);
        }
        record.ended_at = self.clock.now();

        self.history.push_back(record);
        while self.history.len() > self.config.history_limit {
            self.history.pop_front();
        }
        self.state.derive_counters(self.history.iter());

        let outcome = self.terminal_outcome();
        self.next_delay = self.backoff.delay(self.state.consecutive_failures);
        if let Some(last) = self.history.back_mut() {
            last.next_delay_ms = if outcome.is_some() {
                0
            } else {
                self.next_delay.as_millis() as u64
            };
        }

        info!(
            cycle,
            faults = faults.len(),
            consecutive_failures = self.state.consecutive_failures,
            consecutive_clean_cycles = self.state.consecutive_clean_cycles,
            next_delay_ms = self.next_delay.as_millis() as u64,
            "Cycle complete"
        );

        if outcome.is_some() {
            return outcome;
        }

        self.state.phase = LoopPhase::Backoff;
        if let Err(e) = self.persist().await {
            error!(cycle, error = %e, "Failed to persist state snapshot");
            return Some(LoopOutcome::EmergencyStopped {
                reason: format!("failed to persist state snapshot: {e}"),
            });
        }
        None
    }

    /// Emergency stop first, then completion, then the cycle ceiling.
    fn terminal_outcome(&self) -> Option<LoopOutcome> {
        if self.state.consecutive_failures >= self.config.emergency_stop_threshold {
            Some(LoopOutcome::EmergencyStopped {
                reason: format!(
                    "{} consecutive failed cycles",
                    self.state.consecutive_failures
                ),
            })
        } else if self.state.consecutive_clean_cycles >= self.config.required_clean_cycles {
            Some(LoopOutcome::Completed)
        } else if self.state.current_cycle >= self.config.max_cycles {
            Some(LoopOutcome::Exhausted)
        } else {
            None
        }
    }

    /// Backoff sleep, then park while paused. Stop interrupts both.
    async fn wait_for_next_cycle(&mut self) -> Option<LoopOutcome> {
        let clock = self.clock.clone();
        let delay = self.next_delay;
        debug!(delay_ms = delay.as_millis() as u64, "Backing off");

        let mut stop = self.stop.clone();
        tokio::select! {
            biased;
            _ = stop.stopped() => return Some(LoopOutcome::Stopped),
            _ = clock.sleep(delay) => {}
        }

        if self.control_rx.borrow().paused {
            info!(cycle = self.state.current_cycle, "Loop paused");
            self.publish();
            let stopped = self
                .control_rx
                .wait_for(|f| f.stop || !f.paused)
                .await
                .map(|f| f.stop)
                .unwrap_or(true);
            if stopped {
                return Some(LoopOutcome::Stopped);
            }
            info!("Loop resumed");
        }

        if self.control_rx.borrow().stop {
            return Some(LoopOutcome::Stopped);
        }
        None
    }

    /// Enter a terminal phase and persist the final snapshot.
    async fn finish(mut self, outcome: LoopOutcome) -> LoopOutcome {
        let emergency = matches!(outcome, LoopOutcome::EmergencyStopped { .. });
        self.state.finish(outcome);

        if let Err(e) = self.persist().await {
            error!(error = %e, "Failed to persist final state snapshot");
            if !emergency {
                self.state.finish(LoopOutcome::EmergencyStopped {
                    reason: format!("failed to persist state snapshot: {e}"),
                });
                self.publish();
            }
        }

        let outcome = self
            .state
            .outcome
            .clone()
            .unwrap_or(LoopOutcome::Stopped);
        match &outcome {
            LoopOutcome::EmergencyStopped { reason } => {
                error!(cycle = self.state.current_cycle, reason = %reason, "Repair loop emergency stopped")
            }
            other => {
                info!(cycle = self.state.current_cycle, outcome = ?other, "Repair loop finished")
            }
        }
        outcome
    }

    fn set_phase(&mut self, phase: LoopPhase) {
        self.state.phase = phase;
        self.publish();
    }

    fn snapshot(&mut self) -> StateSnapshot {
        self.state.pause_requested = self.control_rx.borrow().paused;
        StateSnapshot::new(
            self.clock.now(),
            self.state.clone(),
            self.history.iter().cloned().collect(),
            self.classifier.active_faults(),
            self.attempts.iter().cloned().collect(),
        )
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        self.status_tx.send_replace(snapshot);
    }

    /// Save the snapshot, then publish it whether or not the save worked.
    async fn persist(&mut self) -> StoreResult<()> {
        let snapshot = self.snapshot();
        let result = self.store.save(&snapshot).await;
        self.status_tx.send_replace(snapshot);
        result
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("run_id", &self.state.run_id)
            .field("phase", &self.state.phase)
            .field("probes", &self.probes)
            .field("actions", &self.catalog.len())
            .finish()
    }
}
