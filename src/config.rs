use clap::Parser;
use std::time::Duration;

use crate::error::GatewayError;
use crate::rate_limit::LimiterPolicy;

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "booking-gateway")]
#[command(about = "Admission-controlling proxy in front of the booking API")]
pub struct Args {
    // Port to run the gateway on
    #[arg(short, long, env = "BOOKING_GATEWAY_PORT", default_value_t = 8080)]
    pub port: u16,

    // Booking application that admitted requests are forwarded to
    #[arg(short, long, env = "BOOKING_GATEWAY_UPSTREAM", default_value = "localhost:5000")]
    pub upstream: String,

    // Max requests inside the burst window
    #[arg(long, env = "BOOKING_GATEWAY_BURST_LIMIT", default_value_t = 3)]
    pub burst_limit: usize,

    // Burst window in milliseconds
    #[arg(long, env = "BOOKING_GATEWAY_BURST_WINDOW_MS", default_value_t = 1000)]
    pub burst_window_ms: u64,

    // Max requests inside the sustained window
    #[arg(long, env = "BOOKING_GATEWAY_SUSTAINED_LIMIT", default_value_t = 100)]
    pub sustained_limit: usize,

    // Sustained window in seconds
    #[arg(long, env = "BOOKING_GATEWAY_SUSTAINED_WINDOW", default_value_t = 60)]
    pub sustained_window: u64,

    // Ban for the first violation in milliseconds, doubled per violation
    #[arg(long, env = "BOOKING_GATEWAY_BASE_BAN_MS", default_value_t = 1000)]
    pub base_ban_ms: u64,

    // Upper bound on a single ban in seconds (unbounded when unset)
    #[arg(long, env = "BOOKING_GATEWAY_MAX_BAN")]
    pub max_ban: Option<u64>,

    // Forget violations after this many ban-free seconds (never when unset)
    #[arg(long, env = "BOOKING_GATEWAY_VIOLATION_DECAY")]
    pub violation_decay: Option<u64>,

    // Seconds of inactivity before a client record may be evicted
    #[arg(long, env = "BOOKING_GATEWAY_IDLE_TTL", default_value_t = 600)]
    pub idle_ttl: u64,

    // Eviction sweep interval in seconds
    #[arg(long, env = "BOOKING_GATEWAY_SWEEP_INTERVAL", default_value_t = 60)]
    pub sweep_interval: u64,

    // Key clients by the first X-Forwarded-For address (only behind a trusted proxy)
    #[arg(long, env = "BOOKING_GATEWAY_TRUST_FORWARDED_FOR", default_value_t = false)]
    pub trust_forwarded_for: bool,
}

impl Args {
    pub fn policy(&self) -> Result<LimiterPolicy, GatewayError> {
        let policy = LimiterPolicy {
            burst_limit: self.burst_limit,
            burst_window: Duration::from_millis(self.burst_window_ms),
            sustained_limit: self.sustained_limit,
            sustained_window: Duration::from_secs(self.sustained_window),
            base_ban: Duration::from_millis(self.base_ban_ms),
            max_ban: self.max_ban.map(Duration::from_secs),
            violation_decay: self.violation_decay.map(Duration::from_secs),
            idle_ttl: Duration::from_secs(self.idle_ttl),
        };
        Ok(policy.validate()?)
    }

    pub fn sweep_interval(&self) -> Result<Duration, GatewayError> {
        if self.sweep_interval == 0 {
            return Err(GatewayError::Config("sweep interval must be greater than zero".to_string()));
        }
        Ok(Duration::from_secs(self.sweep_interval))
    }

    // add http:// if not present
    pub fn upstream_url(&self) -> Result<String, GatewayError> {
        let url = self.upstream.trim().trim_end_matches('/');
        if url.is_empty() {
            return Err(GatewayError::Config("upstream must not be empty".to_string()));
        }
        Ok(if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("http://{}", url)
        })
    }
}
