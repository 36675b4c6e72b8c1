//! Rate limiting for authentication endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking. This sits in front of
//! the per-account lockout and slows down attempts spread across many usernames.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{net::IpAddr, num::NonZeroU32, sync::Arc};

use crate::api::ApiResponse;
use crate::auth::{AuthError, extract_client_ip};

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Rate limiting configuration for authentication endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Per-IP limiter for login attempts
    pub login: Arc<IpLimiter>,
    /// Per-IP limiter for registrations
    pub register: Arc<IpLimiter>,
    /// Whether the client IP comes from `X-Forwarded-For`
    pub trust_forwarded_for: bool,
}

impl RateLimitConfig {
    /// Create limiters allowing the given number of requests per minute per IP.
    /// A zero quota is raised to one.
    pub fn new(login_per_minute: u32, register_per_minute: u32, trust_forwarded_for: bool) -> Self {
        let per_minute = |n: u32| Quota::per_minute(NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN));

        Self {
            login: Arc::new(RateLimiter::keyed(per_minute(login_per_minute))),
            register: Arc::new(RateLimiter::keyed(per_minute(register_per_minute))),
            trust_forwarded_for,
        }
    }

    /// Drop limiter state for IPs whose buckets have refilled.
    pub fn retain_recent(&self) {
        self.login.retain_recent();
        self.register.retain_recent();
    }
}

async fn check(
    limiter: &IpLimiter,
    trust_forwarded_for: bool,
    request: Request,
    next: Next,
) -> Response {
    let ip = match extract_client_ip(&request, trust_forwarded_for) {
        Ok(ip) => ip,
        Err(reason) => {
            tracing::warn!(reason, "Unable to determine client IP");
            return (
                StatusCode::FORBIDDEN,
                ApiResponse::failure(
                    AuthError::Forbidden.code(),
                    "Unable to determine client IP",
                    None,
                ),
            )
                .into_response();
        }
    };

    match limiter.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(%ip, path = %request.uri().path(), "Rate limit exceeded");
            AuthError::RateLimited.into_response()
        }
    }
}

/// Middleware for rate limiting login attempts.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(&config.login, config.trust_forwarded_for, request, next).await
}

/// Middleware for rate limiting registrations.
pub async fn rate_limit_register(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(&config.register, config.trust_forwarded_for, request, next).await
}
