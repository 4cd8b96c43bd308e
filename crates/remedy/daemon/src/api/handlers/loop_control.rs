//! Repair loop control handlers
//!
//! Control requests are acknowledged with `202 Accepted`: stop takes effect
//! at the loop's next suspension point and pause at the next cycle
//! boundary, so the returned snapshot may predate the transition.

use axum::{extract::State, http::StatusCode, Json};
use remedy_types::StateSnapshot;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Response to a control request
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub action: &'static str,
    pub snapshot: StateSnapshot,
}

fn accepted(action: &'static str, snapshot: StateSnapshot) -> (StatusCode, Json<ControlResponse>) {
    (StatusCode::ACCEPTED, Json(ControlResponse { action, snapshot }))
}

/// Latest loop snapshot
pub async fn status(State(state): State<AppState>) -> ApiResult<Json<StateSnapshot>> {
    state
        .service
        .status()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no repair loop snapshot available".to_string()))
}

/// Start a new run
pub async fn start(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<ControlResponse>)> {
    let snapshot = state.service.start().await?;
    Ok(accepted("start", snapshot))
}

/// Stop the running loop
pub async fn stop(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<ControlResponse>)> {
    let snapshot = state.service.stop().await?;
    Ok(accepted("stop", snapshot))
}

/// Pause at the next cycle boundary
pub async fn pause(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<ControlResponse>)> {
    let snapshot = state.service.pause().await?;
    Ok(accepted("pause", snapshot))
}

/// Resume a paused loop
pub async fn resume(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<ControlResponse>)> {
    let snapshot = state.service.resume().await?;
    Ok(accepted("resume", snapshot))
}
