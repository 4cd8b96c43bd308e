//! HTTP server lifecycle

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::api::create_router;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::service::{LoopComponents, LoopService};
use crate::state::AppState;

/// remedyd server
pub struct Server {
    config: DaemonConfig,
    service: Arc<LoopService>,
}

impl Server {
    /// Create a new server, validating the loop configuration up front
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let components = LoopComponents::from_config(&config)?;
        Ok(Self {
            config,
            service: Arc::new(LoopService::new(components)),
        })
    }

    /// Run until a shutdown signal arrives, then stop the loop
    pub async fn run(self) -> DaemonResult<()> {
        let state = AppState::new(self.service.clone());
        let router = create_router(state, self.config.server.enable_cors);

        let addr = self.config.server.listen_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DaemonError::Server(format!("failed to bind {addr}: {e}")))?;

        info!(
            addr = %addr,
            probes = self.config.probes.len(),
            actions = self.config.actions.len(),
            "Server listening"
        );

        if self.config.autostart {
            if let Err(e) = self.service.start().await {
                error!(error = %e, "Autostart failed");
            }
        }

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        let outcome = self
            .service
            .shutdown(self.config.server.shutdown_grace())
            .await;
        info!(outcome = ?outcome, "Server shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
