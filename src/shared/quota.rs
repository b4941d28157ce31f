//! Rate quotas
//!
//! Burst-per-window limits expressed as governor quotas: the burst is the
//! bucket capacity and one cell is replenished every `window / burst`.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::Clock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

/// Direct (unkeyed) limiter over an arbitrary clock.
pub type DirectLimiter<C> = RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Quota allowing `burst` calls per `window`.
pub fn quota(burst: u32, window: Duration) -> Quota {
    let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
    Quota::with_period(window / burst.get())
        .map(|quota| quota.allow_burst(burst))
        .unwrap_or_else(|| Quota::per_second(burst))
}

/// Limiter on the process clock.
pub fn direct(burst: u32, window: Duration) -> DefaultDirectRateLimiter {
    RateLimiter::direct(quota(burst, window))
}

/// Take one cell, or report how long until one is available.
pub fn take<C: Clock>(limiter: &DirectLimiter<C>, clock: &C) -> Result<(), Duration> {
    limiter
        .check()
        .map_err(|not_until| not_until.wait_time_from(clock.now()))
}
