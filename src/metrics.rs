use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};


lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("booking_gateway_requests_total", "Total number of API requests").unwrap();
    pub static ref ADMITTED: Counter =
        register_counter!("booking_gateway_admitted_total", "Requests admitted by the limiter").unwrap();
    pub static ref REJECTED: CounterVec = register_counter_vec!(
        "booking_gateway_rejected_total",
        "Requests rejected by the limiter",
        &["reason"]
    )
    .unwrap();
    pub static ref VIOLATIONS: CounterVec = register_counter_vec!(
        "booking_gateway_violations_total",
        "Threshold violations that started a ban",
        &["limit"]
    )
    .unwrap();
    pub static ref UPSTREAM_ERRORS: Counter =
        register_counter!("booking_gateway_upstream_errors_total", "Failed upstream calls").unwrap();
    pub static ref EVICTED_CLIENTS: Counter =
        register_counter!("booking_gateway_evicted_clients_total", "Client records removed by the sweeper").unwrap();
    pub static ref TRACKED_CLIENTS: Gauge =
        register_gauge!("booking_gateway_tracked_clients", "Current number of client records").unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "booking_gateway_upstream_latency_seconds",
        "Upstream request latency in seconds"
    )
    .unwrap();
}
