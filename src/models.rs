use serde::{Deserialize, Serialize};

// JSON error body, same shape the booking API uses
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}

// Health endpoint response
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub tracked_clients: usize,
}
