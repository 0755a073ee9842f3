//! Token bucket rate limiter
//!
//! This module keeps one token bucket per client key in memory. Buckets are
//! refilled lazily on each admission check, so there is no background ticker:
//! a key that sends nothing costs nothing until its next request.

use axum::http::{header, HeaderMap, HeaderValue};
use moka::{policy::EvictionPolicy, sync::Cache};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{full_refill_seconds, RateLimitConfig};

/// Header carrying the bucket capacity
pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";

/// Header carrying the number of whole tokens left after this request
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Default bound on the number of tracked client keys
pub const DEFAULT_MAX_TRACKED_CLIENTS: u64 = 100_000;

/// Default idle time after which a bucket is dropped
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Longest idle timeout handed to the cache; anything beyond disables idle
/// eviction
const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

// ============================================================================
// Token Bucket
// ============================================================================

/// Mutable per-key limiter state
#[derive(Debug, Clone, Copy)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Add the tokens accrued since the last refill, saturating at `capacity`.
    ///
    /// An instant older than `last_refill` (a racing caller that sampled the
    /// clock earlier) accrues nothing and does not move `last_refill` back.
    fn refill(&mut self, now: Instant, rate: f64, capacity: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).clamp(0.0, capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Current token count
    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

// ============================================================================
// Decision
// ============================================================================

/// Outcome of a single admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Bucket capacity (`X-RateLimit-Limit`)
    pub limit: u32,
    /// Whole tokens left (`X-RateLimit-Remaining`)
    pub remaining: u32,
    /// Seconds until one token is available; only set on rejection
    pub retry_after_seconds: Option<u64>,
}

impl Decision {
    fn admitted(limit: u32, tokens: f64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: whole_tokens(tokens),
            retry_after_seconds: None,
        }
    }

    fn rejected(limit: u32, retry_after_seconds: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            retry_after_seconds: Some(retry_after_seconds),
        }
    }

    /// Stamp the rate limit headers for this decision onto `headers`
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(self.limit));
        headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(self.remaining));
        if let Some(retry_after) = self.retry_after_seconds {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
    }
}

fn whole_tokens(tokens: f64) -> u32 {
    // `as` saturates, and NaN maps to 0
    tokens.max(0.0).floor() as u32
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// In-memory token bucket rate limiter keyed by client identity
///
/// Buckets are held in a bounded cache: a key idle for longer than the idle
/// timeout is dropped, and once `max_tracked_clients` keys are live the least
/// recently used key is evicted. The idle timeout is never shorter than the
/// time a drained bucket needs to refill, so a dropped idle bucket was full
/// anyway. Each bucket sits behind its own mutex so concurrent requests for
/// one key are serialized without contending on unrelated keys.
pub struct RateLimiter {
    refill_rate: f64,
    burst_capacity: u32,
    idle_timeout: Option<Duration>,
    buckets: Cache<String, Arc<Mutex<TokenBucket>>>,
}

impl RateLimiter {
    /// Create a limiter with default cache bounds
    pub fn new(requests_per_minute: u32, burst_size: u32) -> Self {
        Self::with_bounds(
            requests_per_minute,
            burst_size,
            DEFAULT_MAX_TRACKED_CLIENTS,
            DEFAULT_IDLE_TIMEOUT,
        )
    }

    /// Create a limiter from the rate limit section of the settings
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::with_bounds(
            config.requests_per_minute,
            config.burst_size,
            config.max_tracked_clients,
            Duration::from_secs(config.idle_timeout_seconds),
        )
    }

    /// Create a limiter with explicit cache bounds
    pub fn with_bounds(
        requests_per_minute: u32,
        burst_size: u32,
        max_tracked_clients: u64,
        idle_timeout: Duration,
    ) -> Self {
        let idle_timeout = effective_idle_timeout(requests_per_minute, burst_size, idle_timeout);

        let mut builder = Cache::<String, Arc<Mutex<TokenBucket>>>::builder()
            .max_capacity(max_tracked_clients)
            .eviction_policy(EvictionPolicy::lru());
        if let Some(idle_timeout) = idle_timeout {
            builder = builder.time_to_idle(idle_timeout);
        }

        Self {
            refill_rate: f64::from(requests_per_minute) / 60.0,
            burst_capacity: burst_size,
            idle_timeout,
            buckets: builder.build(),
        }
    }

    /// Tokens added per second
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Maximum tokens a bucket can hold
    pub fn burst_capacity(&self) -> u32 {
        self.burst_capacity
    }

    /// Idle time after which a bucket is dropped, `None` if never
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Check whether a request from `key` is admitted right now
    pub fn admit(&self, key: &str) -> Decision {
        self.admit_at(key, Instant::now())
    }

    /// Check whether a request from `key` is admitted at `now`
    ///
    /// A previously unseen key starts with a full bucket and is charged for
    /// this request, leaving `burst_capacity - 1` tokens.
    pub fn admit_at(&self, key: &str, now: Instant) -> Decision {
        let capacity = f64::from(self.burst_capacity);
        let bucket = self
            .buckets
            .get_with_by_ref(key, || Arc::new(Mutex::new(TokenBucket::full(capacity, now))));

        let mut bucket = bucket.lock();
        bucket.refill(now, self.refill_rate, capacity);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Decision::admitted(self.burst_capacity, bucket.tokens);
        }

        let retry_after = ((1.0 - bucket.tokens) / self.refill_rate).ceil().max(1.0);
        Decision::rejected(self.burst_capacity, retry_after as u64)
    }

    /// Snapshot of the bucket for `key`, if one is tracked
    pub fn bucket(&self, key: &str) -> Option<TokenBucket> {
        self.buckets.get(key).map(|bucket| {
            let snapshot = *bucket.lock();
            snapshot
        })
    }

    /// Number of client keys currently tracked
    pub fn tracked_clients(&self) -> u64 {
        self.buckets.run_pending_tasks();
        self.buckets.entry_count()
    }
}

/// Raise `requested` to the full refill time of a drained bucket
fn effective_idle_timeout(
    requests_per_minute: u32,
    burst_size: u32,
    requested: Duration,
) -> Option<Duration> {
    let full_refill = full_refill_seconds(requests_per_minute, burst_size);
    if full_refill > MAX_IDLE_TIMEOUT.as_secs() {
        return None;
    }

    Some(requested.max(Duration::from_secs(full_refill)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_key_burst_counts_down() {
        let limiter = RateLimiter::new(60, 10);
        let now = Instant::now();

        for expected in (0..10).rev() {
            let decision = limiter.admit_at("1.2.3.4", now);
            assert!(decision.allowed);
            assert_eq!(decision.limit, 10);
            assert_eq!(decision.remaining, expected);
            assert_eq!(decision.retry_after_seconds, None);
        }
    }

    #[test]
    fn test_request_past_burst_is_rejected() {
        let limiter = RateLimiter::new(60, 10);
        let now = Instant::now();

        for _ in 0..10 {
            assert!(limiter.admit_at("1.2.3.4", now).allowed);
        }

        let decision = limiter.admit_at("1.2.3.4", now);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after_seconds, Some(1));
    }

    #[test]
    fn test_admitted_again_after_refill_period() {
        let limiter = RateLimiter::new(60, 10);
        let start = Instant::now();

        for _ in 0..11 {
            limiter.admit_at("1.2.3.4", start);
        }

        let decision = limiter.admit_at("1.2.3.4", start + Duration::from_secs(1));
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        // 30 rpm = one token every two seconds
        let limiter = RateLimiter::new(30, 1);
        let now = Instant::now();

        assert!(limiter.admit_at("k", now).allowed);
        let decision = limiter.admit_at("k", now);
        assert_eq!(decision.retry_after_seconds, Some(2));

        let decision = limiter.admit_at("k", now + Duration::from_millis(1500));
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_seconds, Some(1));

        assert!(limiter.admit_at("k", now + Duration::from_secs(2)).allowed);
    }

    #[test]
    fn test_refill_saturates_at_capacity() {
        let limiter = RateLimiter::new(60, 5);
        let start = Instant::now();

        limiter.admit_at("idle", start);
        let decision = limiter.admit_at("idle", start + Duration::from_secs(3600));

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
        let bucket = limiter.bucket("idle").unwrap();
        assert!(bucket.tokens() <= 5.0);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(60, 1);
        let now = Instant::now();

        assert!(limiter.admit_at("a", now).allowed);
        assert!(!limiter.admit_at("a", now).allowed);
        assert!(limiter.admit_at("b", now).allowed);
    }

    #[test]
    fn test_clock_going_backwards_never_goes_negative() {
        let limiter = RateLimiter::new(60, 2);
        let later = Instant::now() + Duration::from_secs(10);
        let earlier = later - Duration::from_secs(5);

        limiter.admit_at("k", later);
        limiter.admit_at("k", later);
        let decision = limiter.admit_at("k", earlier);

        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_seconds, Some(1));
        assert!(limiter.bucket("k").unwrap().tokens() >= 0.0);
    }

    #[test]
    fn test_decision_headers() {
        let mut headers = HeaderMap::new();
        Decision::rejected(10, 3).apply_headers(&mut headers);

        assert_eq!(headers[RATE_LIMIT_LIMIT_HEADER], "10");
        assert_eq!(headers[RATE_LIMIT_REMAINING_HEADER], "0");
        assert_eq!(headers[header::RETRY_AFTER], "3");

        let mut headers = HeaderMap::new();
        Decision::admitted(10, 4.7).apply_headers(&mut headers);
        assert_eq!(headers[RATE_LIMIT_REMAINING_HEADER], "4");
        assert!(!headers.contains_key(header::RETRY_AFTER));
    }

    #[test]
    fn test_from_config() {
        let config = RateLimitConfig {
            enabled: true,
            requests_per_minute: 120,
            burst_size: 20,
            max_tracked_clients: 10,
            idle_timeout_seconds: 60,
        };

        let limiter = RateLimiter::from_config(&config);
        assert_eq!(limiter.burst_capacity(), 20);
        assert!((limiter.refill_rate() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tracked_clients() {
        let limiter = RateLimiter::new(60, 10);
        assert_eq!(limiter.tracked_clients(), 0);

        limiter.admit("a");
        limiter.admit("b");
        limiter.admit("a");
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_new_client_is_limited_when_cache_is_full() {
        let limiter = RateLimiter::with_bounds(60, 2, 2, Duration::from_secs(600));
        let now = Instant::now();

        for _ in 0..20 {
            limiter.admit_at("a", now);
            limiter.admit_at("b", now);
        }

        let mut admitted = 0;
        for _ in 0..10 {
            if limiter.admit_at("c", now).allowed {
                admitted += 1;
            }
            limiter.tracked_clients();
        }

        assert_eq!(admitted, 2);
        assert!(limiter.tracked_clients() <= 2);
    }

    #[test]
    fn test_least_recently_used_client_is_evicted() {
        let limiter = RateLimiter::with_bounds(60, 5, 2, Duration::from_secs(600));
        let now = Instant::now();

        limiter.admit_at("a", now);
        limiter.admit_at("b", now);
        limiter.admit_at("a", now);
        limiter.tracked_clients();

        limiter.admit_at("c", now);
        limiter.tracked_clients();

        assert!(limiter.bucket("a").is_some());
        assert!(limiter.bucket("c").is_some());
        assert!(limiter.bucket("b").is_none());
    }

    #[test]
    fn test_idle_timeout_covers_full_refill() {
        // 100 tokens at 1 rpm take 6000s to refill
        let limiter = RateLimiter::new(1, 100);
        assert_eq!(limiter.idle_timeout(), Some(Duration::from_secs(6000)));

        let limiter = RateLimiter::new(60, 10);
        assert_eq!(limiter.idle_timeout(), Some(DEFAULT_IDLE_TIMEOUT));

        let limiter = RateLimiter::with_bounds(7, 3, 10, Duration::from_secs(5));
        assert_eq!(limiter.idle_timeout(), Some(Duration::from_secs(26)));
    }

    #[test]
    fn test_idle_eviction_disabled_when_nothing_refills() {
        let limiter = RateLimiter::new(0, 10);
        assert_eq!(limiter.idle_timeout(), None);

        let limiter = RateLimiter::new(1, u32::MAX);
        assert_eq!(limiter.idle_timeout(), None);
    }

    #[test]
    fn test_concurrent_admissions_do_not_lose_updates() {
        let limiter = Arc::new(RateLimiter::new(1, 100));
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..25).filter(|_| limiter.admit_at("shared", now).allowed).count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }
}
