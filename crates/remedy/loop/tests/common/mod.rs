#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use remedy_loop::{
    Effector, EffectorContext, EffectorOutput, FnProbe, ProbeFactory, ProbeReading, StateStore,
    StoreError,
};
use remedy_loop::error::{EffectorResult, StoreResult};
use remedy_loop::remedy_types::{ProbeKind, StateSnapshot};

/// Probe that is unhealthy while `broken` is set.
pub fn switch_probe(
    id: &str,
    kind: ProbeKind,
    detail: &'static str,
    broken: Arc<AtomicBool>,
) -> FnProbe {
    ProbeFactory::from_fn(id, kind, move || {
        let broken = broken.clone();
        async move {
            if broken.load(Ordering::SeqCst) {
                Ok(ProbeReading::unhealthy(detail))
            } else {
                Ok(ProbeReading::healthy("ok"))
            }
        }
    })
}

/// Probe whose n-th call (1-based) fails when `fails(n)` is true.
pub fn scripted_probe(
    id: &str,
    kind: ProbeKind,
    detail: &'static str,
    fails: fn(u32) -> bool,
) -> (FnProbe, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let probe = ProbeFactory::from_fn(id, kind, move || {
        let counter = counter.clone();
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if fails(n) {
                Ok(ProbeReading::unhealthy(detail))
            } else {
                Ok(ProbeReading::healthy("ok"))
            }
        }
    });
    (probe, calls)
}

/// Effector that clears a switch and reports success.
pub struct FixingEffector {
    pub broken: Arc<AtomicBool>,
    pub calls: AtomicU32,
}

impl FixingEffector {
    pub fn new(broken: Arc<AtomicBool>) -> Self {
        Self {
            broken,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Effector for FixingEffector {
    async fn execute(&self, _ctx: &EffectorContext) -> EffectorResult<EffectorOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.broken.store(false, Ordering::SeqCst);
        Ok(EffectorOutput::succeeded("fixed"))
    }
}

/// Effector that always reports failure.
pub struct FailingEffector;

#[async_trait]
impl Effector for FailingEffector {
    async fn execute(&self, _ctx: &EffectorContext) -> EffectorResult<EffectorOutput> {
        Ok(EffectorOutput::failed("still degraded"))
    }
}

/// Effector that always succeeds without changing anything.
pub struct NoOpEffector;

#[async_trait]
impl Effector for NoOpEffector {
    async fn execute(&self, _ctx: &EffectorContext) -> EffectorResult<EffectorOutput> {
        Ok(EffectorOutput::succeeded("nothing to do"))
    }
}

/// Store that keeps every saved snapshot.
#[derive(Default)]
pub struct RecordingStore {
    saved: Mutex<Vec<StateSnapshot>>,
}

impl RecordingStore {
    pub fn saved(&self) -> Vec<StateSnapshot> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl StateStore for RecordingStore {
    async fn save(&self, snapshot: &StateSnapshot) -> StoreResult<()> {
        self.saved.lock().unwrap().push(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> StoreResult<Option<StateSnapshot>> {
        Ok(self.saved.lock().unwrap().last().cloned())
    }
}

/// Store whose writes always fail.
pub struct FailingStore;

#[async_trait]
impl StateStore for FailingStore {
    async fn save(&self, _snapshot: &StateSnapshot) -> StoreResult<()> {
        Err(StoreError::Backend("disk full".into()))
    }

    async fn load(&self) -> StoreResult<Option<StateSnapshot>> {
        Ok(None)
    }
}
