//! Token-bucket rate limiting
//!
//! One optional global bucket plus per-IP buckets allocated on first use.
//! Each bucket refills at the configured rate with a burst ceiling of twice
//! that rate. `allow` consumes a single token and never blocks; a rejected
//! request is denied, not queued.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, PoisonError, RwLock};

/// Global and per-IP token-bucket limiter
pub struct RateLimitMiddleware {
    enabled: bool,
    global: Option<DefaultDirectRateLimiter>,
    per_ip_quota: Option<Quota>,
    per_ip: RwLock<HashMap<String, Arc<DefaultDirectRateLimiter>>>,
}

impl RateLimitMiddleware {
    /// Create the limiter pool
    ///
    /// A rate of zero disables the corresponding bucket.
    pub fn new(enabled: bool, global_rps: u32, per_ip_rps: u32) -> Self {
        let global = if enabled {
            NonZeroU32::new(global_rps)
                .map(|rate| RateLimiter::direct(quota_for(rate)))
        } else {
            None
        };

        RateLimitMiddleware {
            enabled,
            global,
            per_ip_quota: NonZeroU32::new(per_ip_rps).map(quota_for),
            per_ip: RwLock::new(HashMap::new()),
        }
    }

    /// Whether a request from the given IP is allowed right now
    ///
    /// The global bucket is consumed before the per-IP bucket is consulted,
    /// so global throttling may take a token the per-IP bucket never sees;
    /// the global limit is a backstop.
    pub fn allow(&self, ip: &str) -> bool {
        if !self.enabled {
            return true;
        }

        if let Some(global) = &self.global {
            if global.check().is_err() {
                return false;
            }
        }

        let Some(quota) = self.per_ip_quota else {
            return true;
        };

        self.ip_limiter(ip, quota).check().is_ok()
    }

    /// Whether rate limiting is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fetch or lazily create the bucket for an IP
    fn ip_limiter(&self, ip: &str, quota: Quota) -> Arc<DefaultDirectRateLimiter> {
        {
            let limiters = self.per_ip.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(limiter) = limiters.get(ip) {
                return Arc::clone(limiter);
            }
        }

        let mut limiters = self.per_ip.write().unwrap_or_else(PoisonError::into_inner);
        // Re-check after acquiring the write lock so two racing connections
        // share one bucket
        Arc::clone(
            limiters
                .entry(ip.to_string())
                .or_insert_with(|| Arc::new(RateLimiter::direct(quota))),
        )
    }
}

/// Bucket quota for a refill rate: burst capacity is twice the rate
fn quota_for(rate: NonZeroU32) -> Quota {
    let burst = NonZeroU32::new(rate.get().saturating_mul(2)).unwrap_or(rate);
    Quota::per_second(rate).allow_burst(burst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_allows_everything() {
        let limiter = RateLimitMiddleware::new(false, 0, 0);
        for _ in 0..1000 {
            assert!(limiter.allow("10.0.0.1"));
        }
    }

    #[test]
    fn test_per_ip_burst_then_rejection() {
        let limiter = RateLimitMiddleware::new(true, 1000, 5);

        // Burst capacity is 2x the rate
        let allowed = (0..15).filter(|_| limiter.allow("10.0.0.1")).count();
        assert_eq!(allowed, 10);

        // A fresh IP gets its own full bucket
        assert!(limiter.allow("10.0.0.2"));
    }

    #[test]
    fn test_ip_isolation() {
        let limiter = RateLimitMiddleware::new(true, 1000, 2);

        while limiter.allow("10.0.0.1") {}
        // Exhausting one bucket leaves others untouched
        assert!(limiter.allow("10.0.0.2"));
        assert!(limiter.allow("10.0.0.2"));
    }

    #[test]
    fn test_global_bucket_is_a_backstop() {
        let limiter = RateLimitMiddleware::new(true, 2, 1000);

        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.2"));
        assert!(limiter.allow("10.0.0.3"));
        assert!(limiter.allow("10.0.0.4"));
        // Global burst of 4 is exhausted across distinct IPs
        assert!(!limiter.allow("10.0.0.5"));
    }

    #[test]
    fn test_bucket_reuse_for_same_ip() {
        let limiter = RateLimitMiddleware::new(true, 1000, 1);

        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        // Third call proves the same bucket is consulted, not a new one
        assert!(!limiter.allow("10.0.0.1"));
    }

    #[test]
    fn test_zero_per_ip_rate_only_checks_global() {
        let limiter = RateLimitMiddleware::new(true, 1, 0);

        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));
    }
}
