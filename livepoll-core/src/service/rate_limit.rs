//! Per-voter rate limiting for the vote boundary
//!
//! In-memory keyed limiter backed by the `governor` crate (GCRA algorithm).
//! Each voter gets an independent bucket. Limits are per-replica only, the
//! same scope as the presence maps.

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter as GovernorRateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::{Error, Result};

#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
}

impl RateLimiter {
    /// Create a limiter allowing `per_second` sustained requests per key
    /// with bursts of up to `burst`.
    #[must_use]
    pub fn new(per_second: u32, burst: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(per_second).unwrap_or(nonzero!(1u32)))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(nonzero!(1u32)));

        Self {
            limiter: Arc::new(GovernorRateLimiter::keyed(quota)),
        }
    }

    /// Check the limit for a key. Returns `Error::RateLimited` with the
    /// retry-after hint when exhausted.
    pub fn check(&self, key: &str) -> Result<()> {
        match self.limiter.check_key(&key.to_string()) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                Err(Error::RateLimited {
                    retry_after_seconds: wait.as_secs().max(1),
                })
            }
        }
    }
}
