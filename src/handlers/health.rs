use axum::{Json, extract::State};
use std::sync::Arc;
use crate::models::HealthResponse;
use crate::state::AppState;

// health handler, never rate limited
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        tracked_clients: state.limiter.tracked_clients(),
    })
}
