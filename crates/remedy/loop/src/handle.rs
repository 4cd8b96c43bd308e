//! Control surface of a running loop.

use std::sync::Arc;

use remedy_types::{LoopOutcome, StateSnapshot};
use tokio::sync::watch;
use tracing::info;

/// Operator requests delivered to the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlFlags {
    pub stop: bool,
    pub paused: bool,
}

/// Cloneable handle to a repair loop.
///
/// Stop takes effect at the next suspension point; pause only at a cycle
/// boundary. Status reads return copies of the latest snapshot.
#[derive(Debug, Clone)]
pub struct LoopHandle {
    control: Arc<watch::Sender<ControlFlags>>,
    status: watch::Receiver<StateSnapshot>,
}

impl LoopHandle {
    pub(crate) fn new(
        control: Arc<watch::Sender<ControlFlags>>,
        status: watch::Receiver<StateSnapshot>,
    ) -> Self {
        Self { control, status }
    }

    /// Request a stop.
    pub fn stop(&self) {
        info!("Stop requested");
        self.control.send_modify(|flags| flags.stop = true);
    }

    /// Request a pause at the next cycle boundary.
    pub fn pause(&self) {
        info!("Pause requested");
        self.control.send_modify(|flags| flags.paused = true);
    }

    /// Clear a pause request.
    pub fn resume(&self) {
        info!("Resume requested");
        self.control.send_modify(|flags| flags.paused = false);
    }

    /// Pending operator requests.
    pub fn flags(&self) -> ControlFlags {
        *self.control.borrow()
    }

    /// Copy of the current snapshot.
    pub fn status(&self) -> StateSnapshot {
        self.status.borrow().clone()
    }

    /// Receiver notified on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.status.clone()
    }

    /// Whether the loop reached a terminal phase.
    pub fn is_finished(&self) -> bool {
        self.status.borrow().state.phase.is_terminal()
    }

    /// Wait for the loop to end and return its outcome.
    ///
    /// Returns `None` if the loop was dropped without finishing.
    pub async fn join(&self) -> Option<LoopOutcome> {
        let mut status = self.status.clone();
        let snapshot = status
            .wait_for(|s| s.state.phase.is_terminal())
            .await
            .ok()
            .map(|s| s.clone())?;
        snapshot.state.outcome
    }
}

/// Resolves once a stop has been requested.
///
/// Cloned into every component that waits inside a cycle, so a stop
/// interrupts probe passes, repair attempts and verification sleeps.
#[derive(Debug, Clone)]
pub struct StopSignal {
    control: watch::Receiver<ControlFlags>,
}

impl StopSignal {
    pub(crate) fn new(control: watch::Receiver<ControlFlags>) -> Self {
        Self { control }
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        let (_control, receiver) = watch::channel(ControlFlags::default());
        Self::new(receiver)
    }

    pub fn is_stopped(&self) -> bool {
        self.control.borrow().stop
    }

    /// Wait for a stop request. Pends forever once no sender remains.
    pub async fn stopped(&mut self) {
        let closed = self.control.wait_for(|f| f.stop).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}
