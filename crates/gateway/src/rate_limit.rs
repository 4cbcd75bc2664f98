//! Per-IP token-bucket rate limiting.
//!
//! Capacity is the configured requests/minute; refill runs at
//! capacity/60 tokens per second on a floating-point accumulator. Buckets
//! are created lazily and evicted after ten minutes of inactivity.

use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    axum::{
        extract::{ConnectInfo, State},
        http::StatusCode,
        middleware::Next,
        response::{IntoResponse, Json, Response},
    },
    dashmap::DashMap,
};

use crate::state::AppState;

/// Idle buckets older than this are evicted.
const EVICT_AFTER: Duration = Duration::from_secs(600);

/// Eviction sweep cadence, counted in requests.
const CLEANUP_EVERY_REQUESTS: u64 = 512;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub enum Decision {
    Allowed,
    Denied { retry_after_secs: u64 },
}

#[derive(Clone, Default)]
pub struct RateLimiter {
    buckets: Arc<DashMap<IpAddr, Bucket>>,
    requests_seen: Arc<AtomicU64>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, ip: IpAddr, capacity: u32) -> Decision {
        self.check_at(ip, capacity, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, capacity: u32, now: Instant) -> Decision {
        if capacity == 0 {
            return Decision::Denied {
                retry_after_secs: 60,
            };
        }
        let capacity = f64::from(capacity);
        let rate = capacity / 60.0;

        let mut entry = self.buckets.entry(ip).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });
        let bucket = entry.value_mut();

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
        bucket.last_refill = now;

        let decision = if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Decision::Allowed
        } else {
            // Whole seconds until one token is back.
            let deficit = 1.0 - bucket.tokens;
            Decision::Denied {
                retry_after_secs: (deficit / rate).ceil().max(1.0) as u64,
            }
        };
        drop(entry);

        self.cleanup_if_needed(now);
        decision
    }

    fn cleanup_if_needed(&self, now: Instant) {
        let seen = self.requests_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % CLEANUP_EVERY_REQUESTS != 0 {
            return;
        }
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_refill) <= EVICT_AFTER);
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Middleware: reject over-budget clients with `429` + `Retry-After`.
pub async fn rate_limit_gate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let capacity = state.config_snapshot().await.gateway.rate_limit_per_minute;
    match state.limiter.check(addr.ip(), capacity) {
        Decision::Allowed => next.run(request).await,
        Decision::Denied { retry_after_secs } => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "too many requests",
                    "retry_after_seconds": retry_after_secs,
                })),
            )
                .into_response();
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response
                    .headers_mut()
                    .insert(axum::http::header::RETRY_AFTER, value);
            }
            response
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(std::net::Ipv4Addr::new(203, 0, 113, last))
    }

    #[test]
    fn burst_spends_the_full_bucket() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        let mut accepted = 0;
        for _ in 0..120 {
            if matches!(limiter.check_at(ip(1), 60, now), Decision::Allowed) {
                accepted += 1;
            }
        }
        // Burst bound: at most capacity in a zero-length window.
        assert_eq!(accepted, 60);
    }

    #[test]
    fn denied_request_reports_retry_after() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for _ in 0..60 {
            let _ = limiter.check_at(ip(2), 60, now);
        }
        match limiter.check_at(ip(2), 60, now) {
            Decision::Denied { retry_after_secs } => assert_eq!(retry_after_secs, 1),
            Decision::Allowed => panic!("should be limited"),
        }
    }

    #[test]
    fn refill_restores_tokens_over_time() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for _ in 0..60 {
            let _ = limiter.check_at(ip(3), 60, now);
        }
        assert!(matches!(
            limiter.check_at(ip(3), 60, now),
            Decision::Denied { .. }
        ));

        // One second later one token has refilled (60/min = 1/sec).
        let later = now + Duration::from_secs(1);
        assert!(matches!(
            limiter.check_at(ip(3), 60, later),
            Decision::Allowed
        ));
        assert!(matches!(
            limiter.check_at(ip(3), 60, later),
            Decision::Denied { .. }
        ));
    }

    #[test]
    fn acceptance_bound_over_window() {
        // Property: accepted over T seconds ≤ ceil(C·T/60) + C.
        let limiter = RateLimiter::new();
        let start = Instant::now();
        let capacity = 30u32;
        let mut accepted = 0;
        // 10 requests per second for 6 seconds.
        for tick in 0..60 {
            let now = start + Duration::from_millis(tick * 100);
            if matches!(limiter.check_at(ip(4), capacity, now), Decision::Allowed) {
                accepted += 1;
            }
        }
        let bound = (f64::from(capacity) * 6.0 / 60.0).ceil() as u32 + capacity;
        assert!(accepted <= bound, "accepted {accepted} > bound {bound}");
    }

    #[test]
    fn buckets_are_isolated_per_ip() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for _ in 0..60 {
            let _ = limiter.check_at(ip(5), 60, now);
        }
        assert!(matches!(
            limiter.check_at(ip(5), 60, now),
            Decision::Denied { .. }
        ));
        assert!(matches!(limiter.check_at(ip(6), 60, now), Decision::Allowed));
    }

    #[test]
    fn idle_buckets_are_evicted() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        let _ = limiter.check_at(ip(7), 60, start);
        assert_eq!(limiter.bucket_count(), 1);

        // Enough requests from another IP to trigger a sweep, far in the
        // future so the first bucket is stale.
        let later = start + Duration::from_secs(1200);
        for _ in 0..CLEANUP_EVERY_REQUESTS + 1 {
            let _ = limiter.check_at(ip(8), 60, later);
        }
        assert!(!limiter.buckets.contains_key(&ip(7)));
    }

    #[test]
    fn zero_capacity_denies_everything() {
        let limiter = RateLimiter::new();
        assert!(matches!(
            limiter.check_at(ip(9), 0, Instant::now()),
            Decision::Denied { .. }
        ));
    }
}
