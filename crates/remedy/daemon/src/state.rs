//! Application state shared across handlers

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::service::LoopService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// The daemon's repair loop
    pub service: Arc<LoopService>,

    /// Daemon version
    pub version: String,

    /// Startup timestamp
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(service: Arc<LoopService>) -> Self {
        Self {
            service,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
        }
    }
}
