//! Rate Limiting Middleware
//!
//! Per-address governor limiters guarding the HTTP and websocket entry
//! points. Limiters live in memory; a background sweep evicts addresses that have
//! been idle longer than the configured TTL.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::auth::is_htmx;
use crate::config::RateLimitSettings;
use crate::infrastructure::metrics;
use crate::shared::error::AppError;
use crate::shared::quota::{self, DirectLimiter};
use crate::startup::AppState;

struct IpEntry<C: Clock> {
    limiter: DirectLimiter<C>,
    last_seen: Mutex<Instant>,
}

/// In-memory per-address rate limiter.
///
/// The map lock is held only to find or insert an entry; each entry's
/// governor limiter is lock-free, so callers for different addresses never
/// contend on admission.
pub struct IpRateLimiter<C: Clock = DefaultClock> {
    entries: Mutex<HashMap<IpAddr, Arc<IpEntry<C>>>>,
    quota: Quota,
    ttl: Duration,
    clock: C,
}

impl IpRateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self::with_clock(settings, DefaultClock::default())
    }
}

impl<C: Clock + Clone> IpRateLimiter<C> {
    pub fn with_clock(settings: &RateLimitSettings, clock: C) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota: quota::quota(settings.ip_requests, settings.window()),
            ttl: settings.ttl(),
            clock,
        }
    }

    /// Take a cell for `ip`. On rejection returns how long to wait.
    pub fn check(&self, ip: IpAddr) -> Result<(), Duration> {
        let entry = {
            let mut entries = self.entries.lock();
            entries
                .entry(ip)
                .or_insert_with(|| {
                    Arc::new(IpEntry {
                        limiter: RateLimiter::direct_with_clock(self.quota, self.clock.clone()),
                        last_seen: Mutex::new(Instant::now()),
                    })
                })
                .clone()
        };

        *entry.last_seen.lock() = Instant::now();
        quota::take(&entry.limiter, &self.clock)
    }

    /// Drop entries idle for longer than the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.last_seen.lock().elapsed() <= self.ttl);
        before - entries.len()
    }

    pub fn tracked(&self) -> usize {
        self.entries.lock().len()
    }

    /// Sweep every `period` until `shutdown` fires.
    pub async fn run_sweeper(self: Arc<Self>, period: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = self.sweep();
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.tracked(), "Swept idle rate limit entries");
                    }
                }
            }
        }
    }
}

/// Resolve the client address: the last `X-Forwarded-For` hop when the
/// proxy is trusted, otherwise the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.rsplit(',').next())
            .and_then(|hop| hop.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    peer.map(|addr| addr.ip())
}

/// Per-address rate limiting middleware.
pub async fn rate_limit_ip(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let Some(ip) = client_ip(
        request.headers(),
        peer,
        state.settings.rate_limit.trust_forwarded_for,
    ) else {
        tracing::warn!(path = %request.uri().path(), "No client address; skipping rate limit");
        return next.run(request).await;
    };

    match state.ip_limiter.check(ip) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            tracing::warn!(ip = %ip, path = %request.uri().path(), "Rate limit exceeded");
            metrics::record_rate_limited("ip");
            too_many_requests(request.headers(), retry_after)
        }
    }
}

/// Create a 429 response carrying `Retry-After`.
fn too_many_requests(headers: &HeaderMap, retry_after: Duration) -> Response {
    // Round up so clients never retry early
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);

    let mut response = if is_htmx(headers) {
        (StatusCode::TOO_MANY_REQUESTS, "Too many requests. Try again later.").into_response()
    } else {
        AppError::RateLimited.into_response()
    };

    if let Ok(v) = HeaderValue::from_str(&secs.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, v);
    }
    response
}
