use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use thiserror::Error;

use crate::metrics::UPSTREAM_ERRORS;
use crate::models::ErrorBody;
use crate::rate_limit::PolicyError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid rate limit policy: {0}")]
    Policy(#[from] PolicyError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            GatewayError::Upstream(e) => {
                UPSTREAM_ERRORS.inc();
                error!("Upstream call failed: {}", e);
                (StatusCode::BAD_GATEWAY, "Booking service unavailable".to_string())
            }
            other => {
                error!("Internal error: {}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };
        (status, Json(ErrorBody::new(message))).into_response()
    }
}
