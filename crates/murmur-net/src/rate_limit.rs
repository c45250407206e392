//! Per-source token buckets in front of the inbound handlers.
//!
//! Requests forwarded by a local onion service all share the loopback
//! address, so in that deployment the limiter acts as one global budget.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn full(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            refilled_at: Instant::now(),
        }
    }

    fn take(&mut self, per_second: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.refilled_at).as_secs_f64();
        self.refilled_at = now;
        self.tokens = (self.tokens + elapsed * per_second).min(capacity);

        if self.tokens < 1.0 {
            return false;
        }
        self.tokens -= 1.0;
        true
    }
}

/// Shared, cloneable limiter keyed by source IP.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<IpAddr, Bucket>>>,
    per_second: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(per_second: f64, burst: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            per_second,
            burst,
        }
    }

    /// Spend one token for `ip`. `false` means the request must be refused.
    pub async fn check(&self, ip: IpAddr) -> bool {
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(ip)
            .or_insert_with(|| Bucket::full(self.burst))
            .take(self.per_second, self.burst)
    }

    /// Forget sources idle for longer than `max_idle`.
    pub async fn purge_idle(&self, max_idle: Duration) {
        let now = Instant::now();
        self.buckets
            .lock()
            .await
            .retain(|_, bucket| now.duration_since(bucket.refilled_at) < max_idle);
    }
}

impl Default for RateLimiter {
    /// 20 requests per second sustained, bursts of 60.
    fn default() -> Self {
        Self::new(20.0, 60.0)
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    // Without connection info (in-process callers) there is nothing to key on.
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>().cloned() {
        if !limiter.check(addr.ip()).await {
            warn!(ip = %addr.ip(), path = %req.uri().path(), "inbound rate limit exceeded");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    Ok(next.run(req).await)
}
