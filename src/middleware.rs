use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{debug, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::{ADMITTED, REJECTED, REQUEST_TOTAL};
use crate::models::ErrorBody;
use crate::rate_limit::Admission;
use crate::state::AppState;

// Existing API clients tell the two rejections apart by these messages
pub const BANNED_MESSAGE: &str = "Rate limit exceeded. Please try again later.";
pub const RATE_EXCEEDED_MESSAGE: &str = "Too many requests. Please slow down.";

pub const UNKNOWN_CLIENT: &str = "unknown";

// Picks the key the limiter tracks this request under
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    match peer {
        Some(addr) => addr.ip().to_string(),
        None => UNKNOWN_CLIENT.to_string(),
    }
}

// whole seconds, rounded up, never zero
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

fn too_many_requests(message: &str, retry_after: Duration) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after_secs(retry_after).to_string())],
        Json(ErrorBody::new(message)),
    )
        .into_response()
}

/// Runs the admission check before any `/api` handler sees the request.
pub async fn admission_guard(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    REQUEST_TOTAL.inc();

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(req.headers(), peer, state.trust_forwarded_for);

    match state.limiter.admit(&key) {
        Admission::Admitted => {
            ADMITTED.inc();
            next.run(req).await
        }
        Admission::Banned { retry_after } => {
            REJECTED.with_label_values(&["banned"]).inc();
            debug!("Rejected {} {} from banned client {}", req.method(), req.uri(), key);
            too_many_requests(BANNED_MESSAGE, retry_after)
        }
        Admission::RateExceeded { retry_after } => {
            REJECTED.with_label_values(&["rate_exceeded"]).inc();
            info!("Client {} exceeded the rate limit on {} {}", key, req.method(), req.uri());
            too_many_requests(RATE_EXCEEDED_MESSAGE, retry_after)
        }
    }
}
