use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::Json;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use serde_json::json;
use tracing::warn;

pub type SharedRateLimiter =
    Arc<RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>>;

/// Per-IP limiter shared by the sensitive endpoints (login, magic-link,
/// coupon redemption). Coupon codes are short and guessable; this is the
/// brake on enumerating them.
pub fn per_minute(requests: u32) -> SharedRateLimiter {
    let quota = Quota::per_minute(NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::keyed(quota))
}

/// The keyed store holds one entry per client IP it has ever seen; shed the
/// idle ones periodically so it does not grow for the life of the process.
pub fn spawn_pruner(limiter: SharedRateLimiter) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            limiter.retain_recent();
        }
    });
}

pub async fn limit(
    State(limiter): State<SharedRateLimiter>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if limiter.check_key(&addr.ip()).is_ok() {
        next.run(request).await
    } else {
        warn!(ip = %addr.ip(), path = %request.uri().path(), "rate limit exceeded");
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Too many requests" })),
        )
            .into_response()
    }
}
