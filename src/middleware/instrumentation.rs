//! Instrumentation stage: per-request metadata.
//!
//! Stamps every request that reaches the router with:
//!
//! - [`RequestedTime`]: when the request entered the handler side of the
//!   pipeline, serialized as an ISO-8601 timestamp with milliseconds.
//! - [`RequestId`]: the client's `X-Request-Id` if present, else a UUIDv4.
//!   Echoed on the response.
//!
//! It also records the request duration histogram. Further cross-cutting
//! metadata belongs here.

use std::time::Instant;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;
use uuid::Uuid;

use super::ip::{ClientIp, UNKNOWN_IP};
use crate::metrics;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Client-supplied IDs longer than this are replaced.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Time the request reached the instrumentation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestedTime(pub DateTime<Utc>);

impl RequestedTime {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// ISO-8601 with millisecond precision, e.g. `2024-05-01T12:00:00.123Z`.
    pub fn to_iso_string(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Correlation ID for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Middleware stamping [`RequestedTime`] and [`RequestId`].
pub async fn instrument(mut request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let request_id = extract_or_generate_request_id(&request);

    request.extensions_mut().insert(RequestedTime::now());
    request.extensions_mut().insert(RequestId(request_id.clone()));
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let client_ip = request
        .extensions()
        .get::<ClientIp>()
        .map_or(UNKNOWN_IP, |ClientIp(ip)| ip.as_str());
    debug!(
        request_id = %request_id,
        client_ip = %client_ip,
        path = %request.uri().path(),
        "Processing request"
    );

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    metrics::record_request_duration(
        method.as_str(),
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );

    response
}

/// Existing usable `X-Request-Id`, or a new UUIDv4.
fn extract_or_generate_request_id(req: &Request) -> String {
    if let Some(header_value) = req.headers().get(REQUEST_ID_HEADER)
        && let Ok(value) = header_value.to_str()
        && !value.is_empty()
        && value.len() <= MAX_REQUEST_ID_LEN
    {
        return value.to_string();
    }

    Uuid::new_v4().to_string()
}
