//! Per-client admission control for the booking API.
//!
//! Every client key gets a sliding history of its recent requests. Two
//! thresholds are checked against that history on each request: a short
//! burst window and a longer sustained window. Crossing either one is a
//! violation, and each violation bans the client for twice as long as the
//! one before it.

mod clock;
mod policy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use policy::{BAN_CEILING, LimiterPolicy, PolicyError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::metrics::{EVICTED_CLIENTS, TRACKED_CLIENTS, VIOLATIONS};

// Rate limit state for one client key
#[derive(Debug, Default)]
struct ClientRecord {
    // oldest first, never older than the sustained window at the last check
    timestamps: VecDeque<Instant>,
    violations: u32,
    banned_until: Option<Instant>,
}

impl ClientRecord {
    fn ban_remaining(&self, now: Instant) -> Option<Duration> {
        self.banned_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) < window {
                break;
            }
            self.timestamps.pop_front();
        }
    }

    fn count_within(&self, now: Instant, window: Duration) -> usize {
        self.timestamps
            .iter()
            .rev()
            .take_while(|&&t| now.saturating_duration_since(t) < window)
            .count()
    }
}

// Which threshold a request crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    Burst,
    Sustained,
}

impl Violation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Violation::Burst => "burst",
            Violation::Sustained => "sustained",
        }
    }
}

/// Result of [`AdmissionController::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    // already serving a ban, request was not recorded
    Banned { retry_after: Duration },
    // this request crossed a threshold and started a new ban
    RateExceeded { retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Read-only copy of a client's record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub requests_in_window: usize,
    pub violations: u32,
    pub banned_for: Option<Duration>,
}

/// Sliding-window limiter with exponential backoff bans.
///
/// One instance is built at startup and shared (`Arc`) by every request
/// task. Records live in a sharded map; `check_rate_limit` holds the write
/// guard of the key's shard for the whole prune/append/check/ban sequence,
/// so calls for the same key are fully serialized.
///
/// `check_rate_limit` does not look at an existing ban. Callers must ask
/// `is_banned` first, or use [`AdmissionController::admit`] which does both
/// in the right order.
pub struct AdmissionController {
    policy: LimiterPolicy,
    clock: Arc<dyn Clock>,
    clients: DashMap<String, ClientRecord>,
}

impl AdmissionController {
    pub fn new(policy: LimiterPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: LimiterPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            clients: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &LimiterPolicy {
        &self.policy
    }

    /// True while `key` is serving a ban. Never creates or touches a record.
    pub fn is_banned(&self, key: &str) -> bool {
        self.ban_remaining(key).is_some()
    }

    // Time left on the current ban, if any
    pub fn ban_remaining(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        self.clients
            .get(key)
            .and_then(|record| record.ban_remaining(now))
    }

    /// Records a request for `key` and decides whether to admit it.
    ///
    /// The request is appended to the history even when it is rejected, so
    /// it keeps counting against later checks. A rejection always starts a
    /// new ban.
    pub fn check_rate_limit(&self, key: &str) -> bool {
        self.record_request(key).is_none()
    }

    /// `is_banned` followed by `check_rate_limit`, the way a request handler uses them.
    pub fn admit(&self, key: &str) -> Admission {
        if let Some(retry_after) = self.ban_remaining(key) {
            return Admission::Banned { retry_after };
        }
        match self.record_request(key) {
            None => Admission::Admitted,
            Some(retry_after) => Admission::RateExceeded { retry_after },
        }
    }

    // Returns the new ban length when the request is a violation
    fn record_request(&self, key: &str) -> Option<Duration> {
        // the shard stays write-locked while `record` lives, so no logging in here
        let (violation, ban, violations, decayed, remaining) = {
            let mut record = match self.clients.entry(key.to_string()) {
                Entry::Occupied(entry) => entry.into_ref(),
                Entry::Vacant(entry) => {
                    TRACKED_CLIENTS.inc();
                    entry.insert(ClientRecord::default())
                }
            };
            let now = self.clock.now();

            record.prune(now, self.policy.sustained_window);
            record.timestamps.push_back(now);

            let violation = if record.timestamps.len() > self.policy.sustained_limit {
                Violation::Sustained
            } else if record.count_within(now, self.policy.burst_window) > self.policy.burst_limit {
                Violation::Burst
            } else {
                return None;
            };

            let mut decayed = false;
            if let (Some(decay), Some(until)) = (self.policy.violation_decay, record.banned_until) {
                if now.saturating_duration_since(until) >= decay {
                    record.violations = 0;
                    decayed = true;
                }
            }

            record.violations = record.violations.saturating_add(1);
            let ban = self.policy.ban_duration(record.violations);
            // ban never exceeds BAN_CEILING, which Instant can always absorb
            let until = now + ban;
            record.banned_until = Some(record.banned_until.map_or(until, |prev| prev.max(until)));

            (violation, ban, record.violations, decayed, record.ban_remaining(now))
        };

        if decayed {
            debug!("Violation history for {} decayed", key);
        }
        VIOLATIONS.with_label_values(&[violation.as_str()]).inc();
        warn!(
            "Client {} banned for {:?} ({} limit, violation #{})",
            key,
            ban,
            violation.as_str(),
            violations
        );

        remaining
    }

    pub fn snapshot(&self, key: &str) -> Option<ClientSnapshot> {
        let now = self.clock.now();
        self.clients.get(key).map(|record| ClientSnapshot {
            requests_in_window: record.count_within(now, self.policy.sustained_window),
            violations: record.violations,
            banned_for: record.ban_remaining(now),
        })
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    /// Drops records that no longer influence any decision.
    ///
    /// A record goes once it is not banned, has seen no request for
    /// `idle_ttl` (and nothing still inside the sustained window), and either never violated or (with `violation_decay` set)
    /// has been ban-free long enough for its violations to be forgotten.
    /// Returns how many records were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        // never drop history the sustained check still counts
        let idle_ttl = self.policy.idle_ttl.max(self.policy.sustained_window);
        let decay = self.policy.violation_decay;
        let before = self.clients.len();

        self.clients.retain(|_, record| {
            if record.ban_remaining(now).is_some() {
                return true;
            }
            let recently_active = record
                .timestamps
                .back()
                .is_some_and(|&last| now.saturating_duration_since(last) < idle_ttl);
            if recently_active {
                return true;
            }
            if record.violations == 0 {
                return false;
            }
            match (decay, record.banned_until) {
                (Some(decay), Some(until)) => now.saturating_duration_since(until) < decay,
                _ => true,
            }
        });

        let evicted = before.saturating_sub(self.clients.len());
        if evicted > 0 {
            EVICTED_CLIENTS.inc_by(evicted as f64);
            TRACKED_CLIENTS.sub(evicted as f64);
            debug!("Evicted {} idle client records", evicted);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> (AdmissionController, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let controller = AdmissionController::with_clock(LimiterPolicy::default(), clock.clone());
        (controller, clock)
    }

    // four requests in the same instant: the fourth is a burst violation
    fn trip_burst(controller: &AdmissionController, key: &str) {
        for _ in 0..3 {
            assert!(controller.check_rate_limit(key));
        }
        assert!(!controller.check_rate_limit(key));
    }

    #[test]
    fn fourth_request_in_a_second_is_rejected() {
        let (limiter, _clock) = controller();
        assert!(!limiter.is_banned("10.0.0.1"));

        trip_burst(&limiter, "10.0.0.1");
        assert!(limiter.is_banned("10.0.0.1"));
    }

    #[test]
    fn burst_window_slides() {
        let (limiter, clock) = controller();
        for _ in 0..3 {
            assert!(limiter.check_rate_limit("a"));
            clock.advance(Duration::from_millis(400));
        }
        // the first request is 1.2s old now, only two remain in the last second
        assert!(limiter.check_rate_limit("a"));
    }

    #[test]
    fn first_ban_expires_after_one_second() {
        let (limiter, clock) = controller();
        trip_burst(&limiter, "a");

        clock.advance(Duration::from_millis(999));
        assert!(limiter.is_banned("a"));

        clock.advance(Duration::from_millis(101));
        assert!(!limiter.is_banned("a"));
        assert!(limiter.check_rate_limit("a"));
    }

    #[test]
    fn rejected_request_is_still_recorded() {
        let (limiter, _clock) = controller();
        trip_burst(&limiter, "a");
        let snapshot = limiter.snapshot("a").unwrap();
        assert_eq!(snapshot.requests_in_window, 4);
        assert_eq!(snapshot.violations, 1);
    }

    #[test]
    fn hundred_and_first_request_in_a_minute_is_rejected() {
        let (limiter, clock) = controller();
        for i in 0..100 {
            assert!(limiter.check_rate_limit("steady"), "request {} rejected", i + 1);
            clock.advance(Duration::from_millis(400));
        }
        assert!(!limiter.check_rate_limit("steady"));
        assert_eq!(limiter.ban_remaining("steady"), Some(Duration::from_secs(1)));
    }

    #[test]
    fn sustained_window_forgets_old_requests() {
        let (limiter, clock) = controller();
        for _ in 0..100 {
            assert!(limiter.check_rate_limit("steady"));
            clock.advance(Duration::from_millis(600));
        }
        // 100 requests over 60s: the first has just left the window
        assert!(limiter.check_rate_limit("steady"));
    }

    #[test]
    fn bans_double_with_each_violation() {
        let (limiter, clock) = controller();
        let mut bans = Vec::new();
        for _ in 0..5 {
            trip_burst(&limiter, "a");
            let ban = limiter.ban_remaining("a").unwrap();
            bans.push(ban.as_secs());
            clock.advance(ban + Duration::from_millis(100));
            assert!(!limiter.is_banned("a"));
        }
        assert_eq!(bans, vec![1, 2, 4, 8, 16]);
    }

    #[test]
    fn checking_while_banned_extends_the_ban() {
        let (limiter, clock) = controller();
        trip_burst(&limiter, "a");
        clock.advance(Duration::from_millis(500));

        // caller skipped is_banned: still recorded, still a violation
        assert!(!limiter.check_rate_limit("a"));
        assert_eq!(limiter.snapshot("a").unwrap().violations, 2);
        assert_eq!(limiter.ban_remaining("a"), Some(Duration::from_secs(2)));
    }

    #[test]
    fn keys_are_independent() {
        let (limiter, _clock) = controller();
        trip_burst(&limiter, "bad");

        assert!(limiter.check_rate_limit("good"));
        assert!(limiter.is_banned("bad"));
        assert!(!limiter.is_banned("good"));
    }

    #[test]
    fn stale_history_is_pruned() {
        let (limiter, clock) = controller();
        for _ in 0..10 {
            limiter.check_rate_limit("a");
        }
        clock.advance(Duration::from_secs(120));

        assert!(limiter.check_rate_limit("a"));
        assert_eq!(limiter.snapshot("a").unwrap().requests_in_window, 1);
    }

    #[test]
    fn is_banned_does_not_mutate() {
        let (limiter, _clock) = controller();
        assert!(!limiter.is_banned("ghost"));
        assert_eq!(limiter.tracked_clients(), 0);

        trip_burst(&limiter, "a");
        let before = limiter.snapshot("a");
        for _ in 0..5 {
            assert!(limiter.is_banned("a"));
        }
        assert_eq!(limiter.snapshot("a"), before);
    }

    #[test]
    fn admit_distinguishes_banned_from_rate_exceeded() {
        let (limiter, _clock) = controller();
        for _ in 0..3 {
            assert_eq!(limiter.admit("a"), Admission::Admitted);
        }
        assert_eq!(
            limiter.admit("a"),
            Admission::RateExceeded { retry_after: Duration::from_secs(1) }
        );
        assert_eq!(
            limiter.admit("a"),
            Admission::Banned { retry_after: Duration::from_secs(1) }
        );
        // the banned attempt was not recorded
        assert_eq!(limiter.snapshot("a").unwrap().requests_in_window, 4);
    }

    #[test]
    fn violations_decay_when_configured() {
        let clock = Arc::new(ManualClock::new());
        let policy = LimiterPolicy {
            violation_decay: Some(Duration::from_secs(300)),
            ..LimiterPolicy::default()
        };
        let limiter = AdmissionController::with_clock(policy, clock.clone());

        trip_burst(&limiter, "a");
        clock.advance(Duration::from_secs(2));
        trip_burst(&limiter, "a");
        assert_eq!(limiter.ban_remaining("a"), Some(Duration::from_secs(2)));

        clock.advance(Duration::from_secs(400));
        trip_burst(&limiter, "a");
        assert_eq!(limiter.snapshot("a").unwrap().violations, 1);
        assert_eq!(limiter.ban_remaining("a"), Some(Duration::from_secs(1)));
    }

    #[test]
    fn violations_never_decay_by_default() {
        let (limiter, clock) = controller();
        trip_burst(&limiter, "a");
        clock.advance(Duration::from_secs(86_400));
        trip_burst(&limiter, "a");
        assert_eq!(limiter.ban_remaining("a"), Some(Duration::from_secs(2)));
    }

    #[test]
    fn sweep_evicts_only_idle_clean_records() {
        let (limiter, clock) = controller();
        limiter.check_rate_limit("quiet");
        trip_burst(&limiter, "offender");

        clock.advance(Duration::from_secs(30));
        limiter.check_rate_limit("busy");
        assert_eq!(limiter.sweep(), 0);

        clock.advance(Duration::from_secs(600));
        assert_eq!(limiter.sweep(), 2);
        assert!(limiter.snapshot("quiet").is_none());
        assert!(limiter.snapshot("busy").is_none());
        // no decay policy, so the violation history must survive
        assert_eq!(limiter.snapshot("offender").unwrap().violations, 1);
    }

    #[test]
    fn sweep_keeps_history_inside_the_sustained_window() {
        let clock = Arc::new(ManualClock::new());
        let policy = LimiterPolicy {
            idle_ttl: Duration::from_secs(10),
            ..LimiterPolicy::default()
        };
        let limiter = AdmissionController::with_clock(policy, clock.clone());

        for _ in 0..80 {
            assert!(limiter.check_rate_limit("pauser"));
            clock.advance(Duration::from_millis(400));
        }
        clock.advance(Duration::from_secs(10));
        assert_eq!(limiter.sweep(), 0);

        // the 101st request inside 60s is still caught after the pause
        let admitted = (0..21)
            .filter(|_| {
                let ok = limiter.check_rate_limit("pauser");
                clock.advance(Duration::from_millis(400));
                ok
            })
            .count();
        assert_eq!(admitted, 20);
        assert_eq!(limiter.snapshot("pauser").unwrap().violations, 1);
    }

    #[test]
    fn sweep_drops_offenders_once_decayed() {
        let clock = Arc::new(ManualClock::new());
        let policy = LimiterPolicy {
            violation_decay: Some(Duration::from_secs(3600)),
            ..LimiterPolicy::default()
        };
        let limiter = AdmissionController::with_clock(policy, clock.clone());
        trip_burst(&limiter, "offender");

        clock.advance(Duration::from_secs(1800));
        assert_eq!(limiter.sweep(), 0);

        clock.advance(Duration::from_secs(1801));
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn concurrent_checks_stay_consistent() {
        let limiter = Arc::new(AdmissionController::with_clock(
            LimiterPolicy::default(),
            Arc::new(ManualClock::new()),
        ));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..25).filter(|_| limiter.check_rate_limit("shared")).count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        // frozen clock: only the first three ever fit in the burst window
        assert_eq!(admitted, 3);
        let snapshot = limiter.snapshot("shared").unwrap();
        assert_eq!(snapshot.requests_in_window, 200);
        // every rejected call counted exactly once
        assert_eq!(snapshot.violations, 197);
    }

    mod logging_outside_the_lock {
        use super::*;
        use dashmap::try_result::TryResult;
        use log::{LevelFilter, Log, Metadata, Record};
        use std::sync::OnceLock;
        use std::sync::atomic::{AtomicBool, Ordering};

        const KEY: &str = "shard-lock-watch";

        static WATCHED: OnceLock<Arc<AdmissionController>> = OnceLock::new();
        static SAW_BAN_LOG: AtomicBool = AtomicBool::new(false);
        static SAW_LOCKED: AtomicBool = AtomicBool::new(false);

        // checks whether the watched key's shard is still held while a line is logged
        struct ShardWatcher;

        impl Log for ShardWatcher {
            fn enabled(&self, _: &Metadata) -> bool {
                true
            }

            fn log(&self, record: &Record) {
                let Some(limiter) = WATCHED.get() else {
                    return;
                };
                if !record.args().to_string().contains(KEY) {
                    return;
                }
                SAW_BAN_LOG.store(true, Ordering::SeqCst);
                if matches!(limiter.clients.try_get(KEY), TryResult::Locked) {
                    SAW_LOCKED.store(true, Ordering::SeqCst);
                }
            }

            fn flush(&self) {}
        }

        static LOGGER: ShardWatcher = ShardWatcher;

        #[test]
        fn ban_is_logged_after_the_shard_lock_is_released() {
            let _ = log::set_logger(&LOGGER);
            log::set_max_level(LevelFilter::Warn);

            let limiter = WATCHED.get_or_init(|| {
                Arc::new(AdmissionController::with_clock(
                    LimiterPolicy::default(),
                    Arc::new(ManualClock::new()),
                ))
            });
            for _ in 0..4 {
                limiter.check_rate_limit(KEY);
            }

            assert!(limiter.is_banned(KEY));
            assert!(SAW_BAN_LOG.load(Ordering::SeqCst));
            assert!(!SAW_LOCKED.load(Ordering::SeqCst));
        }
    }
}
