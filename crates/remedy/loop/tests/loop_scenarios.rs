mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{
    scripted_probe, switch_probe, FailingEffector, FixingEffector, NoOpEffector, RecordingStore,
};
use remedy_loop::remedy_types::{
    FaultCategory, LoopOutcome, LoopPhase, Priority, ProbeKind, RepairAction,
};
use remedy_loop::{
    ActionCatalog, Controller, EffectorRegistry, JsonFileStateStore, LoopConfig, ManualClock,
    ProbeSet, StateStore,
};

fn config() -> LoopConfig {
    LoopConfig {
        base_interval: Duration::from_millis(100),
        max_interval: Duration::from_secs(2),
        emergency_stop_threshold: 10,
        required_clean_cycles: 3,
        ..LoopConfig::for_testing()
    }
}

#[tokio::test]
async fn storage_fixed_performance_exhausted_then_stabilizes() {
    let storage_broken = Arc::new(AtomicBool::new(true));
    // Fails during cycle 1 detection and its first verification pass.
    let (performance, _) = scripted_probe(
        "latency",
        ProbeKind::Performance,
        "response time above 500ms threshold",
        |n| n <= 2,
    );
    let probes = ProbeSet::new()
        .with_probe(switch_probe(
            "db",
            ProbeKind::Storage,
            "connection refused",
            storage_broken.clone(),
        ))
        .with_probe(performance);

    let catalog = ActionCatalog::new(vec![
        RepairAction::new("restart-db", FaultCategory::Storage, Priority::Critical, "fix-storage"),
        RepairAction::new("tune-cache", FaultCategory::Performance, Priority::Medium, "tune")
            .with_max_retries(1),
    ])
    .unwrap();
    let effectors = EffectorRegistry::new()
        .with("fix-storage", FixingEffector::new(storage_broken.clone()))
        .with("tune", FailingEffector);

    let store = Arc::new(RecordingStore::default());
    let controller = Controller::builder(config())
        .with_probes(probes)
        .with_catalog(catalog)
        .with_effectors(effectors)
        .with_store(store.clone())
        .with_clock(Arc::new(ManualClock::default()))
        .build()
        .unwrap();

    let outcome = controller.run().await;

    // Cycle 1 was not clean, so three more clean cycles are needed.
    assert_eq!(outcome, LoopOutcome::Completed);
    assert!(!storage_broken.load(Ordering::SeqCst));

    let saved = store.saved();
    let after_cycle_1 = &saved[0];
    assert_eq!(after_cycle_1.state.current_cycle, 1);
    assert_eq!(after_cycle_1.state.consecutive_failures, 1);
    assert_eq!(after_cycle_1.state.consecutive_clean_cycles, 0);
    assert_eq!(after_cycle_1.active_faults.len(), 1);
    assert_eq!(after_cycle_1.active_faults[0].category, FaultCategory::Performance);

    let cycle_1 = after_cycle_1.last_cycle().unwrap();
    assert_eq!(cycle_1.faults_detected, 2);
    assert_eq!(cycle_1.repairs_attempted, 2);
    assert_eq!(cycle_1.repairs_succeeded, 1);
    assert_eq!(cycle_1.verification_passed, Some(false));
    assert!(!cycle_1.dispatch_aborted);
    assert_eq!(cycle_1.next_delay_ms, 200);
    assert_eq!(after_cycle_1.recent_attempts.len(), 3);

    let after_cycle_3 = &saved[2];
    assert_eq!(after_cycle_3.state.current_cycle, 3);
    assert_eq!(after_cycle_3.state.consecutive_clean_cycles, 2);
    assert_eq!(after_cycle_3.state.consecutive_failures, 0);
    assert!(after_cycle_3.active_faults.is_empty());

    let last = saved.last().unwrap();
    assert_eq!(last.state.phase, LoopPhase::Completed);
    assert_eq!(last.state.current_cycle, 4);
    assert_eq!(last.state.consecutive_clean_cycles, 3);
    assert_eq!(last.state.outcome, Some(LoopOutcome::Completed));

    let delays: Vec<u64> = last.recent_cycles.iter().map(|c| c.next_delay_ms).collect();
    assert_eq!(delays, vec![200, 100, 100, 0]);
    assert!(last.recent_cycles[1..]
        .iter()
        .all(|c| c.faults_detected == 0 && c.verification_passed.is_none()));
}

#[tokio::test]
async fn clean_from_first_cycle_completes_on_third() {
    let (performance, _) = scripted_probe("latency", ProbeKind::Performance, "slow", |n| n == 1);
    let catalog = ActionCatalog::new(vec![RepairAction::new(
        "tune-cache",
        FaultCategory::Performance,
        Priority::Medium,
        "tune",
    )])
    .unwrap();

    let store = Arc::new(RecordingStore::default());
    let controller = Controller::builder(config())
        .with_probes(ProbeSet::new().with_probe(performance))
        .with_catalog(catalog)
        .with_effectors(EffectorRegistry::new().with("tune", NoOpEffector))
        .with_store(store.clone())
        .with_clock(Arc::new(ManualClock::default()))
        .build()
        .unwrap();

    assert_eq!(controller.run().await, LoopOutcome::Completed);

    let last = store.saved().pop().unwrap();
    assert_eq!(last.state.current_cycle, 3);
    assert_eq!(last.recent_cycles[0].verification_passed, Some(true));
}

#[tokio::test]
async fn non_converging_repairs_emergency_stop_with_backoff() {
    let broken = Arc::new(AtomicBool::new(true));
    let clock = Arc::new(ManualClock::default());
    let config = LoopConfig {
        emergency_stop_threshold: 5,
        ..config()
    };

    let controller = Controller::builder(config)
        .with_probes(ProbeSet::new().with_probe(switch_probe(
            "api",
            ProbeKind::Reachability,
            "503 service unavailable",
            broken,
        )))
        .with_clock(clock.clone())
        .build()
        .unwrap();
    let handle = controller.handle();

    let outcome = controller.run().await;

    assert!(matches!(outcome, LoopOutcome::EmergencyStopped { .. }));
    let status = handle.status();
    assert_eq!(status.state.current_cycle, 5);
    assert_eq!(status.state.consecutive_failures, 5);
    assert!(status.state.emergency_stopped);
    assert_eq!(
        clock.sleeps(),
        vec![
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(800),
            Duration::from_millis(1600),
        ]
    );
}

#[tokio::test]
async fn flapping_service_exhausts_cycle_ceiling() {
    // Every third call is healthy: failing cycles use two calls
    // (detection and one verification pass), clean cycles one.
    let (probe, _) = scripted_probe("api", ProbeKind::Reachability, "503", |n| n % 3 != 0);
    let config = LoopConfig {
        emergency_stop_threshold: 3,
        max_cycles: 301,
        ..config()
    };

    let controller = Controller::builder(config)
        .with_probes(ProbeSet::new().with_probe(probe))
        .with_clock(Arc::new(ManualClock::default()))
        .build()
        .unwrap();
    let handle = controller.handle();

    assert_eq!(controller.run().await, LoopOutcome::Exhausted);

    let status = handle.status();
    assert_eq!(status.state.phase, LoopPhase::Exhausted);
    assert_eq!(status.state.current_cycle, 301);
    assert!(!status.state.emergency_stopped);
    assert!(status.recent_cycles.len() <= 50);
}

#[tokio::test]
async fn snapshot_persisted_as_json_document() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStateStore::new(dir.path().join("remedy.json")));

    let controller = Controller::builder(config())
        .with_probes(ProbeSet::new().with_probe(switch_probe(
            "api",
            ProbeKind::Reachability,
            "503",
            Arc::new(AtomicBool::new(false)),
        )))
        .with_store(store.clone())
        .with_clock(Arc::new(ManualClock::default()))
        .build()
        .unwrap();

    assert_eq!(controller.run().await, LoopOutcome::Completed);

    let snapshot = store.load().await.unwrap().unwrap();
    assert_eq!(snapshot.schema_version, 1);
    assert_eq!(snapshot.state.phase, LoopPhase::Completed);
    assert_eq!(snapshot.recent_cycles.len(), 3);

    let document: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
    assert_eq!(document["state"]["phase"], "completed");
    assert_eq!(document["state"]["outcome"]["kind"], "completed");
}
