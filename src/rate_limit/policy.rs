use std::time::Duration;
use thiserror::Error;

// Longest ban the controller will ever hand out (~34,800 years).
// Keeps `Instant + Duration` from overflowing no matter how many violations pile up.
pub const BAN_CEILING: Duration = Duration::from_secs(1 << 40);

/// Thresholds and ban escalation applied by the admission controller.
///
/// The defaults are the booking API's limits: more than 3 requests inside
/// one second or more than 100 inside one minute is a violation, and the
/// n-th violation bans the client for `2^(n-1)` seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterPolicy {
    pub burst_limit: usize,
    pub burst_window: Duration,
    pub sustained_limit: usize,
    pub sustained_window: Duration,
    // ban for the first violation, doubled for each one after
    pub base_ban: Duration,
    pub max_ban: Option<Duration>,
    // forget past violations once a client has behaved for this long
    pub violation_decay: Option<Duration>,
    // how long a quiet record survives the eviction sweep
    pub idle_ttl: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("burst window ({burst:?}) must not exceed sustained window ({sustained:?})")]
    WindowOrder { burst: Duration, sustained: Duration },
    #[error("idle ttl ({idle:?}) must cover the sustained window ({sustained:?})")]
    IdleTtlTooShort { idle: Duration, sustained: Duration },
}

impl Default for LimiterPolicy {
    fn default() -> Self {
        Self {
            burst_limit: 3,
            burst_window: Duration::from_secs(1),
            sustained_limit: 100,
            sustained_window: Duration::from_secs(60),
            base_ban: Duration::from_secs(1),
            max_ban: None,
            violation_decay: None,
            idle_ttl: Duration::from_secs(600),
        }
    }
}

impl LimiterPolicy {
    pub fn validate(self) -> Result<Self, PolicyError> {
        if self.burst_limit == 0 {
            return Err(PolicyError::Zero("burst limit"));
        }
        if self.sustained_limit == 0 {
            return Err(PolicyError::Zero("sustained limit"));
        }
        if self.burst_window.is_zero() {
            return Err(PolicyError::Zero("burst window"));
        }
        if self.sustained_window.is_zero() {
            return Err(PolicyError::Zero("sustained window"));
        }
        if self.base_ban.is_zero() {
            return Err(PolicyError::Zero("base ban"));
        }
        if self.max_ban.is_some_and(|max| max.is_zero()) {
            return Err(PolicyError::Zero("max ban"));
        }
        if self.burst_window > self.sustained_window {
            return Err(PolicyError::WindowOrder {
                burst: self.burst_window,
                sustained: self.sustained_window,
            });
        }
        if self.idle_ttl < self.sustained_window {
            return Err(PolicyError::IdleTtlTooShort {
                idle: self.idle_ttl,
                sustained: self.sustained_window,
            });
        }
        Ok(self)
    }

    // Ban handed out for the n-th violation (n starts at 1)
    pub fn ban_duration(&self, violations: u32) -> Duration {
        let exponent = violations.saturating_sub(1).min(127);
        let nanos = self
            .base_ban
            .as_nanos()
            .checked_mul(1u128 << exponent)
            .unwrap_or(u128::MAX);

        let ban = if nanos >= BAN_CEILING.as_nanos() {
            BAN_CEILING
        } else {
            // below the ceiling, so it fits in u64 nanoseconds
            Duration::from_nanos(nanos as u64)
        };

        match self.max_ban {
            Some(max) => ban.min(max),
            None => ban,
        }
    }
}
