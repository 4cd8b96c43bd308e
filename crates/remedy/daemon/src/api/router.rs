//! Router configuration

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use crate::state::AppState;

/// Create the API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/loop", get(handlers::loop_control::status))
        .route("/loop/start", post(handlers::loop_control::start))
        .route("/loop/stop", post(handlers::loop_control::stop))
        .route("/loop/pause", post(handlers::loop_control::pause))
        .route("/loop/resume", post(handlers::loop_control::resume));

    let router = Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    }
}
