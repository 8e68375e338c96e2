//! Token-bucket rate limiting keyed by API key, tenant and client IP.
//!
//! Buckets are created lazily on first use and never evicted.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Identifies one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimiterKey {
    pub api_key_id: String,
    pub tenant_id: String,
    pub ip: String,
}

impl LimiterKey {
    pub fn new(
        api_key_id: impl Into<String>,
        tenant_id: impl Into<String>,
        ip: impl Into<String>,
    ) -> Self {
        Self {
            api_key_id: api_key_id.into(),
            tenant_id: tenant_id.into(),
            ip: ip.into(),
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    fn new(rate: f64, burst: u32, now: Instant) -> Self {
        Self {
            rate,
            burst: f64::from(burst),
            tokens: f64::from(burst),
            last: now,
        }
    }

    /// Take one token, or report how long until one is available.
    fn take(&mut self, now: Instant) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        if self.rate <= 0.0 || self.burst < 1.0 {
            return Err(Duration::MAX);
        }
        Err(Duration::from_secs_f64((1.0 - self.tokens) / self.rate))
    }
}

/// Per-key token buckets sharing one default rate and burst.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<LimiterKey, TokenBucket>>,
    default_rate: f64,
    default_burst: u32,
}

impl RateLimiter {
    /// `rate` is in requests per second.
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            default_rate: rate,
            default_burst: burst,
        }
    }

    /// Take one request from `key`'s bucket.
    ///
    /// A non-zero `per_minute_override` sizes a newly created bucket at
    /// `rpm / 60` requests per second with a burst of `rpm / 10` (at least 1).
    /// Existing buckets keep the sizing they were created with. On rejection
    /// the error carries the wait until the next token.
    pub fn check(&self, key: &LimiterKey, per_minute_override: u32) -> Result<(), Duration> {
        self.check_at(key, per_minute_override, Instant::now())
    }

    pub fn allow(&self, key: &LimiterKey, per_minute_override: u32) -> bool {
        self.check(key, per_minute_override).is_ok()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn check_at(&self, key: &LimiterKey, per_minute_override: u32, now: Instant) -> Result<(), Duration> {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets.entry(key.clone()).or_insert_with(|| {
            let (rate, burst) = if per_minute_override > 0 {
                (
                    f64::from(per_minute_override) / 60.0,
                    (per_minute_override / 10).max(1),
                )
            } else {
                (self.default_rate, self.default_burst)
            };
            debug!(key = ?key, rate, burst, "Rate limit bucket created");
            TokenBucket::new(rate, burst, now)
        });
        bucket.take(now)
    }
}

/// Whole seconds to advertise in `Retry-After`, never less than 1.
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait
        .as_secs()
        .saturating_add(u64::from(wait.subsec_nanos() > 0));
    secs.max(1)
}

/// The first valid IP in an `X-Forwarded-For` list, else the socket peer.
pub fn extract_client_ip(forwarded_for: Option<&str>, peer: Option<IpAddr>) -> String {
    forwarded_for
        .into_iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .find(|part| part.parse::<IpAddr>().is_ok())
        .map(String::from)
        .or_else(|| peer.map(|ip| ip.to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ip: &str) -> LimiterKey {
        LimiterKey::new("env-1", "acme", ip)
    }

    #[test]
    fn burst_then_reject_then_refill() {
        let limiter = RateLimiter::new(1.0, 2);
        let start = Instant::now();
        let k = key("10.0.0.1");

        assert!(limiter.check_at(&k, 0, start).is_ok());
        assert!(limiter.check_at(&k, 0, start).is_ok());
        let wait = limiter.check_at(&k, 0, start).unwrap_err();
        assert!(wait <= Duration::from_secs(1));

        assert!(limiter.check_at(&k, 0, start + Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn buckets_are_independent_per_key() {
        let limiter = RateLimiter::new(0.5, 1);
        let now = Instant::now();
        assert!(limiter.check_at(&key("1.1.1.1"), 0, now).is_ok());
        assert!(limiter.check_at(&key("1.1.1.1"), 0, now).is_err());
        assert!(limiter.check_at(&key("2.2.2.2"), 0, now).is_ok());
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn per_minute_override_sizes_new_bucket() {
        let limiter = RateLimiter::new(100.0, 100);
        let now = Instant::now();
        let k = key("3.3.3.3");

        // 30 rpm: burst 3, one token every 2s
        for _ in 0..3 {
            assert!(limiter.check_at(&k, 30, now).is_ok());
        }
        let wait = limiter.check_at(&k, 30, now).unwrap_err();
        assert_eq!(retry_after_secs(wait), 2);
    }

    #[test]
    fn small_override_still_allows_one() {
        let limiter = RateLimiter::new(100.0, 100);
        let now = Instant::now();
        let k = key("4.4.4.4");
        assert!(limiter.check_at(&k, 5, now).is_ok());
        assert!(limiter.check_at(&k, 5, now).is_err());
    }

    #[test]
    fn zero_burst_never_allows() {
        let limiter = RateLimiter::new(10.0, 0);
        assert!(!limiter.allow(&key("5.5.5.5"), 0));
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(10)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(3)), 3);
        assert_eq!(retry_after_secs(Duration::MAX), u64::MAX);
    }

    #[test]
    fn client_ip_prefers_first_valid_forwarded() {
        let peer: Option<IpAddr> = "192.168.1.9".parse().ok();
        assert_eq!(
            extract_client_ip(Some("garbage, 203.0.113.7 , 10.0.0.1"), peer),
            "203.0.113.7"
        );
        assert_eq!(extract_client_ip(Some("::1"), peer), "::1");
        assert_eq!(extract_client_ip(Some("nope"), peer), "192.168.1.9");
        assert_eq!(extract_client_ip(None, peer), "192.168.1.9");
        assert_eq!(extract_client_ip(None, None), "unknown");
    }
}
