use log::{debug, info};
use std::sync::Arc;
use tokio::time::{Duration, interval};

use crate::metrics::TRACKED_CLIENTS;
use crate::rate_limit::AdmissionController;

// Eviction sweep - keeps the client map from growing for the process lifetime
pub async fn sweeper(limiter: Arc<AdmissionController>, sweep_interval: Duration) {
    let mut interval = interval(sweep_interval);

    info!(
        "Client sweeper started (interval: {:?}, idle ttl: {:?})",
        sweep_interval,
        limiter.policy().idle_ttl
    );

    loop {
        interval.tick().await;

        let evicted = limiter.sweep();
        let remaining = limiter.tracked_clients();
        TRACKED_CLIENTS.set(remaining as f64);

        if evicted > 0 {
            debug!("Sweep evicted {} records, {} remain", evicted, remaining);
        }
    }
}
