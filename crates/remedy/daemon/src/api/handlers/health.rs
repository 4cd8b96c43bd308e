//! Health check handler

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: i64,
    /// Phase of the current loop, if one was started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_phase: Option<remedy_types::LoopPhase>,
}

/// Daemon liveness
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    let uptime = chrono::Utc::now() - state.started_at;
    let loop_phase = state
        .service
        .current()
        .await
        .map(|handle| handle.status().state.phase);

    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime_seconds: uptime.num_seconds(),
        loop_phase,
    })
}
