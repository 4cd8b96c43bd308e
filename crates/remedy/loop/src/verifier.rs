//! Verifier: confirms a repair batch left no active faults.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::classifier::Classifier;
use crate::clock::Clock;
use crate::detector::Detector;
use crate::probes::ProbeSet;

/// Re-runs detection and classification without triggering repairs.
#[derive(Debug, Clone)]
pub struct Verifier {
    detector: Detector,
    clock: Arc<dyn Clock>,
    passes: u32,
    interval: Duration,
}

impl Verifier {
    pub fn new(detector: Detector, clock: Arc<dyn Clock>, passes: u32, interval: Duration) -> Self {
        Self {
            detector,
            clock,
            passes: passes.max(1),
            interval,
        }
    }

    /// One detection and classification pass. True iff no fault is active.
    pub async fn verify(&self, probes: &ProbeSet, classifier: &mut Classifier) -> bool {
        let signals = self.detector.detect(probes).await;
        classifier.classify(&signals, self.clock.now());
        classifier.table().is_clear()
    }

    /// Flap-suppressed verification.
    ///
    /// Every pass must succeed; the first failing pass ends confirmation.
    #[instrument(skip_all, fields(passes = self.passes))]
    pub async fn confirm(&self, probes: &ProbeSet, classifier: &mut Classifier) -> bool {
        for pass in 1..=self.passes {
            if pass > 1 {
                self.clock.sleep(self.interval).await;
            }
            if !self.verify(probes, classifier).await {
                info!(
                    pass,
                    active = classifier.table().active_len(),
                    "Verification failed"
                );
                return false;
            }
            debug!(pass, "Verification pass succeeded");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::clock::ManualClock;
    use crate::probes::{ProbeFactory, ProbeReading};
    use remedy_types::ProbeKind;

    /// Probe healthy on every call except those listed.
    fn flapping(failing_calls: &'static [u32], calls: Arc<AtomicU32>) -> ProbeSet {
        ProbeSet::new().with_probe(ProbeFactory::from_fn(
            "api",
            ProbeKind::Reachability,
            move || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if failing_calls.contains(&n) {
                        Ok(ProbeReading::unhealthy("503"))
                    } else {
                        Ok(ProbeReading::healthy("200"))
                    }
                }
            },
        ))
    }

    fn verifier(clock: Arc<ManualClock>) -> Verifier {
        let detector = Detector::new(clock.clone(), Duration::from_secs(1));
        Verifier::new(detector, clock, 3, Duration::from_secs(2))
    }

    fn classifier() -> Classifier {
        Classifier::new(Duration::from_secs(60), Duration::from_secs(600))
    }

    #[tokio::test]
    async fn test_confirm_requires_all_passes() {
        let clock = Arc::new(ManualClock::default());
        let calls = Arc::new(AtomicU32::new(0));
        let probes = flapping(&[], calls.clone());

        assert!(verifier(clock.clone()).confirm(&probes, &mut classifier()).await);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2); 2]);
    }

    #[tokio::test]
    async fn test_first_failing_pass_ends_confirmation() {
        let clock = Arc::new(ManualClock::default());
        let calls = Arc::new(AtomicU32::new(0));
        let probes = flapping(&[2], calls.clone());
        let mut classifier = classifier();

        assert!(!verifier(clock).confirm(&probes, &mut classifier).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(classifier.table().active_len(), 1);
    }

    #[tokio::test]
    async fn test_verify_clears_recovered_faults() {
        let clock = Arc::new(ManualClock::default());
        let calls = Arc::new(AtomicU32::new(0));
        let probes = flapping(&[1], calls);
        let verifier = verifier(clock);
        let mut classifier = classifier();

        assert!(!verifier.verify(&probes, &mut classifier).await);
        assert!(verifier.verify(&probes, &mut classifier).await);
        assert!(classifier.table().is_clear());
    }
}
