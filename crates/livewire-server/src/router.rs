//! Axum router construction.
//!
//! The base router carries the health check and the WebSocket upgrade
//! route, with CORS and request tracing enabled. Callers extend it
//! through the setup hook passed to
//! [`Application::with_setup`](crate::Application::with_setup).

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::routing::get;
use axum::Json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::ws;

/// Route of the health check.
pub const HEALTH_PATH: &str = "/health";

/// Build the base router.
///
/// - `GET /health` -- lifecycle phase and registered models
/// - `GET {socket_path}` -- WebSocket upgrade for change events
pub fn build_router(state: Arc<AppState>, socket_path: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(socket_path, get(ws::ws_socket))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /health`
async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "phase": state.phase(),
        "models": state.registry.model_names(),
    }))
}
