//! Health route

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub available_slots: usize,
    pub active_paths: usize,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// GET /health - liveness only, never touches the engine
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        available_slots: state.invoker().available_slots(),
        active_paths: state.registry().len(),
    })
}
