use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, Method, Uri, header};
use axum::response::{IntoResponse, Response};
use log::debug;
use std::sync::Arc;
use std::time::Instant;

use crate::error::GatewayError;
use crate::metrics::REQUEST_LATENCY;
use crate::state::AppState;

// booking payloads are small JSON documents, larger bodies get 413
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const FORWARDED_REQUEST_HEADERS: [HeaderName; 4] = [
    header::CONTENT_TYPE,
    header::ACCEPT,
    header::AUTHORIZATION,
    header::COOKIE,
];

const RELAYED_RESPONSE_HEADERS: [HeaderName; 3] = [
    header::CONTENT_TYPE,
    header::SET_COOKIE,
    header::LOCATION,
];

// Forwards an admitted /api request to the booking service and relays its answer
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = format!("{}{}", state.upstream, path);
    debug!("Forwarding {} {}", method, url);

    let mut request = state.client.request(method, &url).body(body);
    for name in &FORWARDED_REQUEST_HEADERS {
        for value in headers.get_all(name) {
            request = request.header(name, value);
        }
    }

    let start_time = Instant::now();
    let upstream = request.send().await?;
    let status = upstream.status();

    let mut relayed = HeaderMap::new();
    for name in &RELAYED_RESPONSE_HEADERS {
        for value in upstream.headers().get_all(name) {
            relayed.append(name, value.clone());
        }
    }
    let bytes = upstream.bytes().await?;
    REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());

    let mut response = (status, bytes).into_response();
    // drop the default octet-stream type, the upstream's headers win
    response.headers_mut().remove(header::CONTENT_TYPE);
    response.headers_mut().extend(relayed);
    Ok(response)
}
