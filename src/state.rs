use std::sync::Arc;
use crate::rate_limit::AdmissionController;
// app's shared state

pub struct AppState {
    pub client: reqwest::Client,
    pub upstream: String,                   // booking service base url
    pub limiter: Arc<AdmissionController>,
    pub trust_forwarded_for: bool,          // key clients by X-Forwarded-For
}

impl AppState {
    pub fn new(upstream: String, limiter: Arc<AdmissionController>, trust_forwarded_for: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            upstream,
            limiter,
            trust_forwarded_for,
        }
    }
}
