//! Per-source token-bucket rate limiting.
//!
//! A throttled request is also reported to the engine, where it counts as
//! a failure toward the fail2ban threshold.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::http::request::ClientIp;
use crate::http::response::ApiError;
use crate::http::server::AppState;

struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Default)]
pub struct RateLimiter {
    buckets: DashMap<IpAddr, TokenBucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one token for `ip`. Limits come from the live config so a
    /// reload applies to existing buckets.
    pub fn check(&self, ip: IpAddr, config: &RateLimitConfig) -> bool {
        let burst = f64::from(config.burst_size.max(1));
        let rps = f64::from(config.requests_per_second);
        self.buckets
            .entry(ip)
            .or_insert_with(|| TokenBucket::new(burst))
            .try_acquire(burst, rps)
    }

    /// Forget buckets untouched for `idle`.
    pub fn purge_idle(&self, idle: Duration) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| bucket.last_update.elapsed() < idle);
        before - self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    request: Request<Body>,
    next: Next,
) -> Response {
    let allowed = {
        let config = state.config.load();
        !config.rate_limit.enabled || state.limiter.check(ip, &config.rate_limit)
    };
    if allowed {
        return next.run(request).await;
    }

    tracing::warn!(client = %ip, path = %request.uri().path(), "rate limit exceeded");
    state.engine.note_throttled(ip).await;
    ApiError::TooManyRequests("rate limit exceeded".into()).into_response()
}
