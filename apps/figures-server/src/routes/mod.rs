//! HTTP routes

pub mod download;
pub mod extract;
pub mod health;
pub mod staging;

use axum::{extract::DefaultBodyLimit, middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::gate::request_gate;
use crate::state::AppState;

/// Build the full application router
///
/// Everything except `/health` passes through the request gate.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let gated = Router::new()
        .merge(extract::router())
        .merge(download::router())
        .layer(middleware::from_fn_with_state(
            state.gate().clone(),
            request_gate,
        ));

    Router::new()
        .merge(health::router())
        .merge(gated)
        .layer(DefaultBodyLimit::max(state.config().storage.max_content_length))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
