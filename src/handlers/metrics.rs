use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use log::error;
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;

use crate::metrics::TRACKED_CLIENTS;
use crate::state::AppState;

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // exact count at scrape time, between sweeps the gauge only moves on insert/evict
    TRACKED_CLIENTS.set(state.limiter.tracked_clients() as f64);

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    (StatusCode::OK, String::from_utf8_lossy(&buffer).into_owned())
}
