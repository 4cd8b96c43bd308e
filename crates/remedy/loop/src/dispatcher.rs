//! Repair dispatcher: runs a dispatch plan tier by tier.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use remedy_types::{
    ActionId, AttemptOutcome, Fault, FaultCategory, Priority, RepairAction, RepairAttempt,
};
use tracing::{debug, error, info, instrument, warn};

use crate::catalog::ActionCatalog;
use crate::clock::Clock;
use crate::effector::{Effector, EffectorContext, EffectorRegistry};
use crate::error::EffectorResult;
use crate::handle::StopSignal;

/// Cap on the total number of attempts in one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchBudget {
    pub max_attempts: u32,
}

impl DispatchBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn unlimited() -> Self {
        Self {
            max_attempts: u32::MAX,
        }
    }
}

/// Why an action was not attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A dependency did not succeed.
    DependencyFailed(ActionId),
    /// The dispatch attempt budget was spent.
    BudgetExhausted,
    /// A critical action in an earlier tier exhausted its retries.
    Aborted,
    /// No effector registered under the action's effector name.
    MissingEffector(String),
    /// A stop was requested before the action started.
    Stopped,
}

/// Final status of one planned action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    Succeeded,
    /// Every allowed attempt failed or timed out.
    Exhausted,
    /// A stop request cut the action short after it started.
    Interrupted,
    Skipped(SkipReason),
}

/// What happened to one planned action.
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub action_id: ActionId,
    pub priority: Priority,
    pub tier: usize,
    pub status: ActionStatus,
    pub attempts: Vec<RepairAttempt>,
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Reports in execution order.
    pub actions: Vec<ActionReport>,
    /// Critical action whose exhaustion stopped the dispatch.
    pub aborted_by: Option<ActionId>,
    /// A stop request ended the dispatch early.
    pub stopped: bool,
}

impl DispatchReport {
    /// Every attempt, in execution order.
    pub fn attempts(&self) -> impl Iterator<Item = &RepairAttempt> {
        self.actions.iter().flat_map(|a| a.attempts.iter())
    }

    /// Actions that received at least one attempt.
    pub fn attempted(&self) -> usize {
        self.actions.iter().filter(|a| !a.attempts.is_empty()).count()
    }

    pub fn succeeded(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.status == ActionStatus::Succeeded)
            .count()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted_by.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn status_of(&self, id: &ActionId) -> Option<&ActionStatus> {
        self.actions
            .iter()
            .find(|a| &a.action_id == id)
            .map(|a| &a.status)
    }
}

/// Executes repair actions through registered effectors.
#[derive(Debug, Clone)]
pub struct RepairDispatcher {
    registry: EffectorRegistry,
    clock: Arc<dyn Clock>,
    retry_delay: Duration,
    stop: StopSignal,
}

impl RepairDispatcher {
    pub fn new(registry: EffectorRegistry, clock: Arc<dyn Clock>, retry_delay: Duration) -> Self {
        Self {
            registry,
            clock,
            retry_delay,
            stop: StopSignal::never(),
        }
    }

    /// Abandon attempts, retry delays and later tiers once `stop` fires.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn registry(&self) -> &EffectorRegistry {
        &self.registry
    }

    /// Dispatch repairs for a set of faults.
    #[instrument(skip_all, fields(faults = faults.len(), budget = budget.max_attempts))]
    pub async fn dispatch(
        &self,
        faults: &[Fault],
        catalog: &ActionCatalog,
        budget: DispatchBudget,
    ) -> DispatchReport {
        let categories: BTreeSet<FaultCategory> = faults.iter().map(|f| f.category).collect();
        let plan = catalog.plan(&categories);

        let mut by_category: HashMap<FaultCategory, Vec<Fault>> = HashMap::new();
        for fault in faults {
            by_category.entry(fault.category).or_default().push(fault.clone());
        }
        let by_category: HashMap<FaultCategory, Arc<[Fault]>> = by_category
            .into_iter()
            .map(|(category, list)| (category, Arc::from(list)))
            .collect();
        let empty: Arc<[Fault]> = Arc::from(Vec::new());

        let remaining = AtomicU32::new(budget.max_attempts);
        let mut succeeded: HashSet<ActionId> = HashSet::new();
        let mut report = DispatchReport::default();

        info!(
            actions = plan.action_count(),
            tiers = plan.tiers().len(),
            "Dispatching repairs"
        );

        for (tier_idx, tier) in plan.tiers().iter().enumerate() {
            if self.stop.is_stopped() && !report.stopped {
                info!(tier = tier_idx, "Stop requested, abandoning dispatch");
                report.stopped = true;
            }
            let skip = if report.stopped {
                Some(SkipReason::Stopped)
            } else if report.aborted_by.is_some() {
                Some(SkipReason::Aborted)
            } else {
                None
            };
            if let Some(reason) = skip {
                for action in tier {
                    report
                        .actions
                        .push(skipped(action, tier_idx, reason.clone()));
                }
                continue;
            }

            let mut runnable: Vec<(&RepairAction, Arc<dyn Effector>)> = Vec::new();
            let mut tier_reports: Vec<Option<ActionReport>> = Vec::with_capacity(tier.len());
            for action in tier {
                if let Some(dep) = action.depends_on.iter().find(|d| !succeeded.contains(*d)) {
                    debug!(action_id = %action.id, dependency = %dep, "Skipping action");
                    tier_reports.push(Some(skipped(
                        action,
                        tier_idx,
                        SkipReason::DependencyFailed(dep.clone()),
                    )));
                    continue;
                }
                match self.registry.get(&action.effector) {
                    Some(effector) => {
                        runnable.push((action, effector));
                        tier_reports.push(None);
                    }
                    None => {
                        warn!(action_id = %action.id, effector = %action.effector, "Effector not registered");
                        tier_reports.push(Some(skipped(
                            action,
                            tier_idx,
                            SkipReason::MissingEffector(action.effector.clone()),
                        )));
                    }
                }
            }

            let results = join_all(runnable.iter().map(|(action, effector)| {
                let faults = by_category
                    .get(&action.category)
                    .cloned()
                    .unwrap_or_else(|| empty.clone());
                self.run_action(action, effector.as_ref(), faults, tier_idx, &remaining)
            }))
            .await;

            // Merge concurrent results back into declaration slots.
            let mut results = results.into_iter();
            for slot in tier_reports {
                let action_report = match slot {
                    Some(r) => r,
                    None => match results.next() {
                        Some(r) => r,
                        None => continue,
                    },
                };

                match action_report.status {
                    ActionStatus::Interrupted | ActionStatus::Skipped(SkipReason::Stopped) => {
                        report.stopped = true;
                    }
                    ActionStatus::Succeeded => {
                        succeeded.insert(action_report.action_id.clone());
                    }
                    ActionStatus::Exhausted
                        if action_report.priority == Priority::Critical
                            && report.aborted_by.is_none() =>
                    {
                        error!(
                            action_id = %action_report.action_id,
                            "Critical repair exhausted its retries, aborting dispatch"
                        );
                        report.aborted_by = Some(action_report.action_id.clone());
                    }
                    _ => {}
                }
                report.actions.push(action_report);
            }
        }

        report
    }

    async fn run_action(
        &self,
        action: &RepairAction,
        effector: &dyn Effector,
        faults: Arc<[Fault]>,
        tier: usize,
        remaining: &AtomicU32,
    ) -> ActionReport {
        let mut attempts = Vec::new();
        let mut status = ActionStatus::Exhausted;

        for attempt in 1..=action.max_attempts() {
            if self.stop.is_stopped() {
                status = if attempts.is_empty() {
                    ActionStatus::Skipped(SkipReason::Stopped)
                } else {
                    ActionStatus::Interrupted
                };
                break;
            }
            let granted = remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !granted {
                warn!(action_id = %action.id, attempt, "Repair attempt budget exhausted");
                if attempts.is_empty() {
                    status = ActionStatus::Skipped(SkipReason::BudgetExhausted);
                }
                break;
            }
            if attempt > 1 {
                let mut stop = self.stop.clone();
                let stopped = tokio::select! {
                    biased;
                    _ = stop.stopped() => true,
                    _ = self.clock.sleep(self.retry_delay) => false,
                };
                if stopped {
                    remaining.fetch_add(1, Ordering::SeqCst);
                    status = ActionStatus::Interrupted;
                    break;
                }
            }

            let ctx = EffectorContext {
                action_id: action.id.clone(),
                category: action.category,
                attempt,
                faults: faults.clone(),
            };
            let (record, interrupted) = self.attempt(action, effector, &ctx).await;
            let done = record.succeeded();
            info!(
                action_id = %action.id,
                attempt,
                outcome = %record.outcome,
                "Repair attempt finished"
            );
            attempts.push(record);

            if interrupted {
                status = ActionStatus::Interrupted;
                break;
            }
            if done {
                status = ActionStatus::Succeeded;
                break;
            }
        }

        ActionReport {
            action_id: action.id.clone(),
            priority: action.priority,
            tier,
            status,
            attempts,
        }
    }

    async fn attempt(
        &self,
        action: &RepairAction,
        effector: &dyn Effector,
        ctx: &EffectorContext,
    ) -> (RepairAttempt, bool) {
        let started_at = self.clock.now();
        let mut stop = self.stop.clone();
        let result = tokio::select! {
            biased;
            _ = stop.stopped() => None,
            result = tokio::time::timeout(action.timeout(), apply(effector, ctx)) => Some(result),
        };
        let ended_at = self.clock.now();

        let interrupted = result.is_none();
        let (outcome, output) = match result {
            Some(Ok(Ok(pair))) => pair,
            Some(Ok(Err(e))) => (AttemptOutcome::Failure, e.to_string()),
            Some(Err(_)) => (
                AttemptOutcome::Timeout,
                format!("attempt timed out after {}ms", action.timeout_ms),
            ),
            None => (
                AttemptOutcome::Failure,
                "attempt interrupted by stop request".to_string(),
            ),
        };

        let record = RepairAttempt::new(
            action.id.clone(),
            ctx.attempt,
            started_at,
            ended_at,
            outcome,
            &output,
        );
        (record, interrupted)
    }
}

/// Execute then check the post-condition.
async fn apply(
    effector: &dyn Effector,
    ctx: &EffectorContext,
) -> EffectorResult<(AttemptOutcome, String)> {
    let output = effector.execute(ctx).await?;
    if !output.success {
        return Ok((AttemptOutcome::Failure, output.output));
    }
    if effector.validate(ctx).await? {
        Ok((AttemptOutcome::Success, output.output))
    } else {
        Ok((
            AttemptOutcome::Failure,
            format!("post-condition failed: {}", output.output),
        ))
    }
}

fn skipped(action: &RepairAction, tier: usize, reason: SkipReason) -> ActionReport {
    ActionReport {
        action_id: action.id.clone(),
        priority: action.priority,
        tier,
        status: ActionStatus::Skipped(reason),
        attempts: Vec::new(),
    }
}
