//! Detector: one concurrent pass over the probe set.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use remedy_types::{ProbeErrorKind, Signal};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{error::Elapsed, Instant};
use tracing::{debug, error, instrument, warn};

use crate::clock::Clock;
use crate::error::{ProbeError, ProbeResult};
use crate::probes::{Probe, ProbeReading, ProbeSet};

/// Runs every probe of a set concurrently with a per-probe time budget.
///
/// Each probe runs on its own task. A probe that errors, overruns its
/// budget or panics yields a failing signal rather than being dropped.
/// Probes are never retried.
#[derive(Debug, Clone)]
pub struct Detector {
    clock: Arc<dyn Clock>,
    per_probe_timeout: Duration,
}

type ProbeRun = (Result<ProbeResult<ProbeReading>, Elapsed>, u64);

/// Probe task, aborted if the pass is dropped before it finishes.
struct ProbeTask(JoinHandle<ProbeRun>);

impl Drop for ProbeTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Detector {
    pub fn new(clock: Arc<dyn Clock>, per_probe_timeout: Duration) -> Self {
        Self {
            clock,
            per_probe_timeout,
        }
    }

    pub fn per_probe_timeout(&self) -> Duration {
        self.per_probe_timeout
    }

    /// Run one pass. Output order equals probe-set order.
    #[instrument(skip(self, probes), fields(probes = probes.len()))]
    pub async fn detect(&self, probes: &ProbeSet) -> Vec<Signal> {
        let mut tasks: Vec<ProbeTask> = probes
            .probes()
            .iter()
            .map(|probe| ProbeTask(tokio::spawn(run_probe(probe.clone(), self.per_probe_timeout))))
            .collect();

        let results = join_all(tasks.iter_mut().map(|task| &mut task.0)).await;
        let signals: Vec<Signal> = probes
            .probes()
            .iter()
            .zip(results)
            .map(|(probe, result)| self.to_signal(probe.as_ref(), result))
            .collect();

        let failing = signals.iter().filter(|s| s.is_failure()).count();
        debug!(total = signals.len(), failing, "Detector pass complete");
        signals
    }

    fn to_signal(&self, probe: &dyn Probe, result: Result<ProbeRun, JoinError>) -> Signal {
        let timestamp = self.clock.now();
        let id = probe.id().clone();
        let kind = probe.kind();

        match result {
            Ok((Ok(Ok(reading)), latency_ms)) if reading.ok => {
                Signal::healthy(id, kind, timestamp, latency_ms, reading.detail)
            }
            Ok((Ok(Ok(reading)), latency_ms)) => {
                Signal::failing(id, kind, timestamp, latency_ms, reading.detail)
            }
            Ok((Ok(Err(e)), latency_ms)) => {
                warn!(probe = %id, error = %e, "Probe failed to execute");
                Signal::errored(id, kind, timestamp, latency_ms, e.kind(), e.to_string())
            }
            Ok((Err(_), _)) => {
                let timeout_ms = self.per_probe_timeout.as_millis() as u64;
                warn!(probe = %id, timeout_ms, "Probe timed out");
                Signal::errored(
                    id,
                    kind,
                    timestamp,
                    timeout_ms,
                    ProbeErrorKind::Timeout,
                    ProbeError::Timeout(timeout_ms).to_string(),
                )
            }
            Err(e) => {
                let detail = if e.is_panic() {
                    "probe panicked"
                } else {
                    "probe task cancelled"
                };
                error!(probe = %id, error = %e, "Probe task failed");
                Signal::errored(
                    id,
                    kind,
                    timestamp,
                    0,
                    ProbeErrorKind::Internal,
                    ProbeError::Internal(detail.to_string()).to_string(),
                )
            }
        }
    }
}

async fn run_probe(probe: Arc<dyn Probe>, timeout: Duration) -> ProbeRun {
    let start = Instant::now();
    let result = tokio::time::timeout(timeout, probe.probe()).await;
    (result, start.elapsed().as_millis() as u64)
}
