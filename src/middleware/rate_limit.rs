//! Per-client rate limiting stage.
//!
//! Wraps a [`FixedWindowLimiter`] in a Tower layer. The client key is the
//! [`ClientIp`] stored by [`identify_client`](super::ip::identify_client),
//! so the proxy trust policy decides whether forwarding headers count.
//! Without that stage the socket peer is used.
//!
//! # Response Headers
//!
//! Allowed requests:
//! - `X-RateLimit-Limit`: Configured max per window
//! - `X-RateLimit-Remaining`: Requests left in the current window
//! - `X-RateLimit-Reset`: Seconds until the window restarts
//!
//! On rate limit exceeded (429), additionally:
//! - `Retry-After`: Seconds until the next request will be accepted
//!
//! The 429 itself is an operational [`AppError`], so it flows through the
//! global error handler like any other failure.

use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::warn;

use super::ip::{ClientIp, ProxyTrust, resolve_client_ip};
use crate::error::AppError;
use crate::limiter::{Decision, FixedWindowLimiter};
use crate::metrics;

/// Message returned with every 429.
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests, please try again in an hour";

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

/// Rate limiting layer for the Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let store = Arc::new(MemoryStore::new());
/// let limiter = FixedWindowLimiter::new(2000, Duration::from_secs(3600), store)?;
/// let app = Router::new()
///     .route("/api", get(handler))
///     .layer(RateLimitLayer::new(limiter))
///     .layer(from_fn_with_state(ProxyTrust::new(true, &[]), identify_client));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: FixedWindowLimiter,
}

impl RateLimitLayer {
    pub fn new(limiter: FixedWindowLimiter) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: FixedWindowLimiter,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let client_ip = match req.extensions().get::<ClientIp>() {
            Some(ClientIp(ip)) => ip.clone(),
            None => resolve_client_ip(&req, &ProxyTrust::peer_only()).into_owned(),
        };

        // Counted before any await point
        let decision = self.limiter.check(&client_ip);
        let limit = self.limiter.max();

        let mut inner = self.inner.clone();

        Box::pin(async move {
            match decision {
                Decision::Allowed {
                    remaining,
                    reset_after,
                } => {
                    let mut response = inner.call(req).await?;
                    insert_limit_headers(response.headers_mut(), limit, remaining, reset_after);
                    Ok(response)
                }
                Decision::Limited { reset_after } => {
                    let retry_after = seconds_ceil(reset_after);

                    warn!(
                        client_ip = %client_ip,
                        path = %req.uri().path(),
                        retry_after_secs = retry_after,
                        "Rate limit exceeded for client"
                    );
                    metrics::record_rate_limited();

                    let mut response = AppError::too_many_requests(RATE_LIMIT_MESSAGE).into_response();
                    let headers = response.headers_mut();
                    insert_limit_headers(headers, limit, 0, reset_after);
                    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));

                    Ok(response)
                }
            }
        })
    }
}

/// Whole seconds, rounded up and never below 1.
fn seconds_ceil(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

fn insert_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset: Duration) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(seconds_ceil(reset)));
}
