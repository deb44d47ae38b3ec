//! Per-account request rate limiting.
//!
//! Sliding window keyed by account id; the limit comes from the account's
//! tier (`requests_per_hour`, 0 disables it).

use crate::accounts::Tier;
use crate::config::TierPolicies;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const RATE_LIMIT_WINDOW_SECS: u64 = 3_600;
const RATE_LIMITER_SWEEP_INTERVAL_SECS: u64 = 300;

#[derive(Debug)]
struct SlidingWindowRateLimiter {
    window: Duration,
    requests: Mutex<(HashMap<String, Vec<Instant>>, Instant)>,
}

impl SlidingWindowRateLimiter {
    fn new(window: Duration) -> Self {
        Self {
            window,
            requests: Mutex::new((HashMap::new(), Instant::now())),
        }
    }

    /// Record a request for `key` at `now`, or return how long until the
    /// oldest request in the window expires.
    fn check(&self, key: &str, limit: u32, now: Instant) -> Result<(), Duration> {
        if limit == 0 {
            return Ok(());
        }

        let cutoff = now.checked_sub(self.window).unwrap_or(now);
        let mut guard = self.requests.lock();
        let (requests, last_sweep) = &mut *guard;

        // Drop keys with no recent requests.
        if now.saturating_duration_since(*last_sweep)
            >= Duration::from_secs(RATE_LIMITER_SWEEP_INTERVAL_SECS)
        {
            requests.retain(|_, timestamps| {
                timestamps.retain(|t| *t > cutoff);
                !timestamps.is_empty()
            });
            *last_sweep = now;
        }

        let entry = requests.entry(key.to_owned()).or_default();
        entry.retain(|instant| *instant > cutoff);

        if entry.len() >= limit as usize {
            let oldest = entry.first().copied().unwrap_or(now);
            let retry_after = (oldest + self.window).saturating_duration_since(now);
            return Err(retry_after.max(Duration::from_secs(1)));
        }

        entry.push(now);
        Ok(())
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.requests.lock().0.len()
    }
}

/// Request limits per billing tier.
#[derive(Debug)]
pub struct TierRateLimiter {
    free: u32,
    pro: u32,
    enterprise: u32,
    window: SlidingWindowRateLimiter,
}

impl TierRateLimiter {
    pub fn new(policies: &TierPolicies) -> Self {
        Self::with_window(policies, Duration::from_secs(RATE_LIMIT_WINDOW_SECS))
    }

    fn with_window(policies: &TierPolicies, window: Duration) -> Self {
        Self {
            free: policies.free.requests_per_hour,
            pro: policies.pro.requests_per_hour,
            enterprise: policies.enterprise.requests_per_hour,
            window: SlidingWindowRateLimiter::new(window),
        }
    }

    pub fn limit_for(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Free => self.free,
            Tier::Pro => self.pro,
            Tier::Enterprise => self.enterprise,
        }
    }

    /// Count one request. `Err` carries the suggested retry delay.
    pub fn check(&self, account_id: &str, tier: Tier) -> Result<(), Duration> {
        self.window
            .check(account_id, self.limit_for(tier), Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(free: u32, pro: u32) -> TierRateLimiter {
        let mut policies = TierPolicies::default();
        policies.free.requests_per_hour = free;
        policies.pro.requests_per_hour = pro;
        policies.enterprise.requests_per_hour = 0;
        TierRateLimiter::new(&policies)
    }

    #[test]
    fn default_limits_follow_tiers() {
        let limiter = TierRateLimiter::new(&TierPolicies::default());
        assert_eq!(limiter.limit_for(Tier::Free), 100);
        assert_eq!(limiter.limit_for(Tier::Pro), 5_000);
        assert_eq!(limiter.limit_for(Tier::Enterprise), 20_000);
    }

    #[test]
    fn blocks_after_limit() {
        let limiter = limiter(3, 10);
        for _ in 0..3 {
            assert!(limiter.check("acct", Tier::Free).is_ok());
        }
        let retry_after = limiter.check("acct", Tier::Free).unwrap_err();
        assert!(retry_after <= Duration::from_secs(RATE_LIMIT_WINDOW_SECS));
        assert!(retry_after >= Duration::from_secs(1));

        // Other accounts are unaffected.
        assert!(limiter.check("other", Tier::Free).is_ok());
    }

    #[test]
    fn tier_determines_limit() {
        let limiter = limiter(1, 5);
        assert!(limiter.check("acct", Tier::Pro).is_ok());
        assert!(limiter.check("acct", Tier::Pro).is_ok());
        assert!(limiter.check("free", Tier::Free).is_ok());
        assert!(limiter.check("free", Tier::Free).is_err());
    }

    #[test]
    fn zero_disables_limit() {
        let limiter = limiter(0, 0);
        for _ in 0..1_000 {
            assert!(limiter.check("acct", Tier::Enterprise).is_ok());
        }
        assert_eq!(limiter.window.tracked_keys(), 0);
    }

    #[test]
    fn window_slides() {
        let window = SlidingWindowRateLimiter::new(Duration::from_secs(60));
        let start = Instant::now();
        assert!(window.check("k", 2, start).is_ok());
        assert!(window.check("k", 2, start + Duration::from_secs(10)).is_ok());

        let retry = window.check("k", 2, start + Duration::from_secs(20)).unwrap_err();
        assert_eq!(retry, Duration::from_secs(40));

        // First request falls out of the window.
        assert!(window.check("k", 2, start + Duration::from_secs(61)).is_ok());
    }

    #[test]
    fn sweep_drops_idle_keys() {
        let window = SlidingWindowRateLimiter::new(Duration::from_secs(60));
        let start = Instant::now();
        assert!(window.check("idle", 5, start).is_ok());
        assert_eq!(window.tracked_keys(), 1);

        let later = start + Duration::from_secs(RATE_LIMITER_SWEEP_INTERVAL_SECS + 1);
        assert!(window.check("busy", 5, later).is_ok());
        assert_eq!(window.tracked_keys(), 1);
    }
}
