use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use proptest::prelude::*;
use remedy_loop::error::EffectorResult;
use remedy_loop::remedy_types::{
    AttemptOutcome, Fault, FaultCategory, Fingerprint, Priority, ProbeId, ProbeKind, RepairAction,
    Severity, Signal,
};
use remedy_loop::{
    ActionCatalog, ActionStatus, DispatchBudget, Effector, EffectorContext, EffectorOutput,
    EffectorRegistry, ManualClock, RepairDispatcher,
};

/// Applies a keyed change; the first invocation applies it and then hangs
/// past the attempt timeout.
struct ReplicaRestart {
    applied: Mutex<HashSet<String>>,
    invocations: AtomicU32,
}

#[async_trait]
impl Effector for ReplicaRestart {
    async fn execute(&self, _ctx: &EffectorContext) -> EffectorResult<EffectorOutput> {
        let call = self.invocations.fetch_add(1, Ordering::SeqCst);
        self.applied
            .lock()
            .unwrap()
            .insert("replica-2:restarted".to_string());
        if call == 0 {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(EffectorOutput::succeeded("replica-2 restarted"))
    }
}

fn storage_fault() -> Fault {
    let now = Utc::now();
    let signal = Signal::failing(ProbeId::new("db"), ProbeKind::Storage, now, 3, "refused");
    Fault::new(Fingerprint::of_signal(&signal), Severity::Critical, signal, now)
}

#[tokio::test(start_paused = true)]
async fn retry_after_timeout_applies_change_once() {
    let effector = Arc::new(ReplicaRestart {
        applied: Mutex::new(HashSet::new()),
        invocations: AtomicU32::new(0),
    });
    let mut registry = EffectorRegistry::new();
    registry.register("restart-replica", effector.clone());

    let catalog = ActionCatalog::new(vec![RepairAction::new(
        "restart-replica",
        FaultCategory::Storage,
        Priority::Critical,
        "restart-replica",
    )
    .with_timeout(Duration::from_secs(5))
    .with_max_retries(2)])
    .unwrap();

    let dispatcher = RepairDispatcher::new(
        registry,
        Arc::new(ManualClock::default()),
        Duration::from_millis(100),
    );
    let report = dispatcher
        .dispatch(&[storage_fault()], &catalog, DispatchBudget::unlimited())
        .await;

    let outcomes: Vec<_> = report.attempts().map(|a| a.outcome).collect();
    assert_eq!(outcomes, vec![AttemptOutcome::Timeout, AttemptOutcome::Success]);
    assert_eq!(effector.invocations.load(Ordering::SeqCst), 2);
    assert_eq!(effector.applied.lock().unwrap().len(), 1);
    assert!(!report.is_aborted());
}

/// Records the order in which actions start.
struct OrderLog(Mutex<Vec<String>>);

#[async_trait]
impl Effector for OrderLog {
    async fn execute(&self, ctx: &EffectorContext) -> EffectorResult<EffectorOutput> {
        self.0.lock().unwrap().push(ctx.action_id.as_str().to_string());
        Ok(EffectorOutput::succeeded("ok"))
    }
}

fn priority(n: u8) -> Priority {
    match n % 4 {
        0 => Priority::Critical,
        1 => Priority::High,
        2 => Priority::Medium,
        _ => Priority::Low,
    }
}

/// Random DAGs: action `i` may only depend on actions declared before it.
fn catalog_strategy() -> impl Strategy<Value = Vec<RepairAction>> {
    (1usize..10)
        .prop_flat_map(|n| {
            (
                proptest::collection::vec(any::<u8>(), n),
                proptest::collection::vec(proptest::collection::vec(any::<bool>(), n), n),
            )
        })
        .prop_map(|(priorities, edges)| {
            let n = priorities.len();
            (0..n)
                .map(|i| {
                    let mut action = RepairAction::new(
                        format!("a{i}"),
                        FaultCategory::Storage,
                        priority(priorities[i]),
                        "log",
                    );
                    for j in 0..i {
                        if edges[i][j] {
                            action = action.depends_on(format!("a{j}"));
                        }
                    }
                    action
                })
                .collect()
        })
}

proptest! {
    #[test]
    fn dependents_always_run_in_a_later_tier(actions in catalog_strategy()) {
        let catalog = ActionCatalog::new(actions.clone()).unwrap();
        let plan = catalog.plan(&BTreeSet::from([FaultCategory::Storage]));

        prop_assert_eq!(plan.action_count(), actions.len());
        for action in &actions {
            let tier = plan.tier_of(&action.id).unwrap();
            for dep in &action.depends_on {
                prop_assert!(plan.tier_of(dep).unwrap() < tier);
            }
        }
        for tier in plan.tiers() {
            let keys: Vec<_> = tier.iter().map(|a| a.priority).collect();
            let mut sorted = keys.clone();
            sorted.sort();
            prop_assert_eq!(keys, sorted);
        }
    }
}

#[tokio::test]
async fn dispatch_follows_dependency_tiers() {
    let log = Arc::new(OrderLog(Mutex::new(Vec::new())));
    let mut registry = EffectorRegistry::new();
    registry.register("log", log.clone());

    let catalog = ActionCatalog::new(vec![
        RepairAction::new("failover", FaultCategory::Storage, Priority::Critical, "log")
            .depends_on("snapshot"),
        RepairAction::new("snapshot", FaultCategory::Storage, Priority::Low, "log"),
    ])
    .unwrap();

    let report = RepairDispatcher::new(
        registry,
        Arc::new(ManualClock::default()),
        Duration::from_millis(1),
    )
    .dispatch(&[storage_fault()], &catalog, DispatchBudget::unlimited())
    .await;

    assert_eq!(*log.0.lock().unwrap(), vec!["snapshot", "failover"]);
    assert!(report
        .actions
        .iter()
        .all(|a| a.status == ActionStatus::Succeeded));
}
