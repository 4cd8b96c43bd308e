//! # Remedy Daemon
//!
//! `remedyd` hosts a single repair loop behind a small REST API:
//!
//! - `GET  /api/v1/health`
//! - `GET  /api/v1/loop` (latest snapshot)
//! - `POST /api/v1/loop/start`, `/stop`, `/pause`, `/resume`

pub mod api;
pub mod config;
pub mod error;
pub mod server;
pub mod service;
pub mod state;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError, DaemonResult};
pub use server::Server;
pub use service::{LoopComponents, LoopService};
pub use state::AppState;
