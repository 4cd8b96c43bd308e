//! Ownership of the daemon's repair loop.
//!
//! One loop runs at a time. Each start builds a fresh controller (and run
//! id) from the same components.

use std::sync::Arc;
use std::time::Duration;

use remedy_loop::{
    ActionCatalog, Clock, Controller, EffectorRegistry, LoopConfig, LoopHandle, ProbeSet,
    StateStore, SystemClock,
};
use remedy_types::{LoopOutcome, StateSnapshot};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::config::DaemonConfig;
use crate::error::{ApiError, ApiResult, DaemonResult};

/// Everything needed to build a controller.
#[derive(Clone)]
pub struct LoopComponents {
    pub config: LoopConfig,
    pub probes: ProbeSet,
    pub catalog: ActionCatalog,
    pub effectors: EffectorRegistry,
    pub store: Arc<dyn StateStore>,
    pub clock: Arc<dyn Clock>,
}

impl LoopComponents {
    /// Build components from daemon configuration.
    ///
    /// Fails fast on an invalid loop config, catalog or effector reference,
    /// so a bad file is reported at startup rather than on first start.
    pub fn from_config(config: &DaemonConfig) -> DaemonResult<Self> {
        let loop_config = config.loop_settings.to_loop_config();
        loop_config.validate().map_err(remedy_loop::LoopError::from)?;

        let catalog = config.catalog()?;
        let effectors = config.effector_registry();
        catalog
            .validate_effectors(&effectors)
            .map_err(remedy_loop::LoopError::from)?;

        Ok(Self {
            config: loop_config,
            probes: config.probe_set(),
            catalog,
            effectors,
            store: config.state.build(),
            clock: Arc::new(SystemClock),
        })
    }

    fn controller(&self) -> remedy_loop::LoopResult<Controller> {
        Controller::builder(self.config.clone())
            .with_probes(self.probes.clone())
            .with_catalog(self.catalog.clone())
            .with_effectors(self.effectors.clone())
            .with_store(self.store.clone())
            .with_clock(self.clock.clone())
            .build()
    }
}

impl std::fmt::Debug for LoopComponents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopComponents")
            .field("config", &self.config)
            .field("probes", &self.probes)
            .field("catalog", &self.catalog)
            .field("effectors", &self.effectors)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// Operator-facing wrapper around the current loop.
pub struct LoopService {
    components: LoopComponents,
    current: Mutex<Option<LoopHandle>>,
}

impl LoopService {
    pub fn new(components: LoopComponents) -> Self {
        Self {
            components,
            current: Mutex::new(None),
        }
    }

    /// Handle of the most recently started loop, finished or not.
    pub async fn current(&self) -> Option<LoopHandle> {
        self.current.lock().await.clone()
    }

    /// Start a new run. Conflicts with a loop that has not finished.
    #[instrument(skip(self))]
    pub async fn start(&self) -> ApiResult<StateSnapshot> {
        let mut current = self.current.lock().await;
        if let Some(handle) = current.as_ref() {
            if !handle.is_finished() {
                return Err(ApiError::Conflict(format!(
                    "repair loop {} is already running",
                    handle.status().state.run_id
                )));
            }
        }

        let controller = self.components.controller()?;
        let handle = controller.spawn();
        let snapshot = handle.status();
        info!(run_id = %snapshot.state.run_id, "Repair loop started");
        *current = Some(handle);
        Ok(snapshot)
    }

    /// Request a stop of the running loop.
    pub async fn stop(&self) -> ApiResult<StateSnapshot> {
        let handle = self.running().await?;
        handle.stop();
        Ok(handle.status())
    }

    /// Request a pause at the next cycle boundary.
    pub async fn pause(&self) -> ApiResult<StateSnapshot> {
        let handle = self.running().await?;
        handle.pause();
        Ok(handle.status())
    }

    /// Clear a pause request.
    pub async fn resume(&self) -> ApiResult<StateSnapshot> {
        let handle = self.running().await?;
        handle.resume();
        Ok(handle.status())
    }

    /// Latest snapshot: the live loop's if one was started, else whatever
    /// the store holds from a previous process.
    pub async fn status(&self) -> ApiResult<Option<StateSnapshot>> {
        if let Some(handle) = self.current().await {
            return Ok(Some(handle.status()));
        }
        Ok(self.components.store.load().await?)
    }

    /// Stop the running loop and wait up to `grace` for it to settle.
    pub async fn shutdown(&self, grace: Duration) -> Option<LoopOutcome> {
        let handle = self.current().await?;
        if handle.is_finished() {
            return handle.join().await;
        }

        handle.stop();
        match tokio::time::timeout(grace, handle.join()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Repair loop did not stop within grace period"
                );
                None
            }
        }
    }

    async fn running(&self) -> ApiResult<LoopHandle> {
        match self.current().await {
            Some(handle) if !handle.is_finished() => Ok(handle),
            _ => Err(ApiError::Conflict("repair loop is not running".to_string())),
        }
    }
}

impl std::fmt::Debug for LoopService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopService")
            .field("components", &self.components)
            .finish_non_exhaustive()
    }
}
