//! Rate limiting for the login endpoint.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow password guessing.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc, time::Duration};
use tracing::warn;

use crate::api::ApiError;
use crate::auth::extract_client_ip;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Default sustained login rate: one attempt per second per IP.
pub const DEFAULT_LOGIN_PERIOD: Duration = Duration::from_secs(1);

/// Default login burst: five attempts before the bucket starts to drain.
pub const DEFAULT_LOGIN_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();

/// Rate limiting configuration for the login endpoint.
#[derive(Clone)]
pub struct RateLimitConfig {
    pub login: Arc<IpLimiter>,
    /// Key on the first `X-Forwarded-For` hop instead of the socket address
    pub trust_forwarded_for: bool,
}

impl RateLimitConfig {
    pub fn new(trust_forwarded_for: bool) -> Self {
        Self::with_login_quota(DEFAULT_LOGIN_PERIOD, DEFAULT_LOGIN_BURST, trust_forwarded_for)
    }

    /// One replenished attempt every `period`, with `burst` attempts available up front.
    pub fn with_login_quota(period: Duration, burst: NonZeroU32, trust_forwarded_for: bool) -> Self {
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst);
        Self {
            login: Arc::new(RateLimiter::keyed(quota)),
            trust_forwarded_for,
        }
    }
}

/// Middleware for rate limiting login attempts.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = match extract_client_ip(&request, config.trust_forwarded_for) {
        Ok(ip) => ip,
        Err(reason) => {
            warn!(reason, "Rejecting login without a client address");
            return (StatusCode::FORBIDDEN, "Unable to determine client IP.").into_response();
        }
    };

    match config.login.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            warn!(ip = %ip, "Login rate limit exceeded");
            ApiError::too_many_requests(
                "Too many authentication attempts. Please wait before trying again.",
            )
            .into_response()
        }
    }
}
