pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod rate_limit;
pub mod state;
pub mod sweeper;

use axum::{Router, extract::DefaultBodyLimit, middleware::from_fn_with_state, routing::{any, get}};
use std::sync::Arc;

use crate::state::AppState;

// /api is guarded by the admission check, health and metrics are not
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/{*path}", any(handlers::proxy_handler))
        .layer(DefaultBodyLimit::max(handlers::MAX_BODY_BYTES))
        .route_layer(from_fn_with_state(state.clone(), middleware::admission_guard));

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .merge(api)
        .with_state(state)
}
