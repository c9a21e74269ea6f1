//! Sanitization stage: parse, clean, and forward.
//!
//! Runs first in the pipeline. For each request:
//!
//! 1. The path has percent-encoded markup neutralized so path parameters
//!    decode to escaped text.
//! 2. The query string is cleaned with [`sanitize_form`].
//! 3. The body is collected up to the configured limit (413 beyond it).
//!    JSON bodies are parsed and cleaned with [`sanitize_value`]; form
//!    bodies with [`sanitize_form`]. Other content types pass through.
//!
//! Tainted content never causes a rejection. Only parse failures do:
//! malformed JSON is a 400 and an oversized body a 413, both operational.

use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::extract::OriginalUri;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue};
use axum::http::uri::PathAndQuery;
use axum::http::{Request, Response, Uri};
use axum::response::IntoResponse;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tower::{Layer, Service};
use tracing::debug;

use crate::error::{AppError, AppResult, describe_serde_message};
use crate::metrics;
use crate::sanitize::{SanitizeReport, sanitize_form, sanitize_path, sanitize_value};

/// Sanitization layer for the Tower middleware stack.
#[derive(Debug, Clone, Copy)]
pub struct SanitizeLayer {
    max_body_size: usize,
}

impl SanitizeLayer {
    /// `max_body_size` bounds how many body bytes are buffered for parsing.
    pub fn new(max_body_size: usize) -> Self {
        Self { max_body_size }
    }
}

impl<S> Layer<S> for SanitizeLayer {
    type Service = SanitizeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SanitizeService {
            inner,
            max_body_size: self.max_body_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SanitizeService<S> {
    inner: S,
    max_body_size: usize,
}

impl<S> Service<Request<Body>> for SanitizeService<S>
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
        let limit = self.max_body_size;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match sanitize_request(req, limit).await {
                Ok(req) => inner.call(req).await,
                Err(err) => Ok(err.into_response()),
            }
        })
    }
}

/// Body encodings the stage knows how to clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Form,
    Opaque,
}

impl BodyKind {
    fn of(headers: &HeaderMap) -> Self {
        let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
            return BodyKind::Opaque;
        };
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if mime == "application/json" || mime.ends_with("+json") {
            BodyKind::Json
        } else if mime == "application/x-www-form-urlencoded" {
            BodyKind::Form
        } else {
            BodyKind::Opaque
        }
    }
}

async fn sanitize_request(req: Request<Body>, limit: usize) -> AppResult<Request<Body>> {
    let (mut parts, body) = req.into_parts();
    let mut report = SanitizeReport::default();

    if let Some(uri) = sanitize_uri(&parts.uri, &mut report)? {
        parts.extensions.insert(OriginalUri(uri.clone()));
        parts.uri = uri;
    }

    if declared_length(&parts.headers).is_some_and(|len| len > limit) {
        return Err(AppError::payload_too_large(limit));
    }

    let raw = collect_body(body, limit).await?;
    let cleaned = match BodyKind::of(&parts.headers) {
        _ if raw.is_empty() => None,
        BodyKind::Json => sanitize_json_body(&raw, &mut report)?,
        BodyKind::Form => {
            let text = std::str::from_utf8(&raw)
                .map_err(|_| AppError::bad_request("Form body is not valid UTF-8"))?;
            let (form, form_report) = sanitize_form(text);
            (!form_report.is_clean()).then(|| {
                report.removed_keys += form_report.removed_keys;
                report.escaped_strings += form_report.escaped_strings;
                Bytes::from(form)
            })
        }
        BodyKind::Opaque => None,
    };

    let body = match cleaned {
        Some(bytes) => {
            parts
                .headers
                .insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
            Body::from(bytes)
        }
        None => Body::from(raw),
    };

    if !report.is_clean() {
        debug!(
            path = %parts.uri.path(),
            removed_keys = report.removed_keys,
            escaped_strings = report.escaped_strings,
            "Sanitized request input"
        );
        metrics::record_sanitized(&report);
    }

    Ok(Request::from_parts(parts, body))
}

/// Rewritten URI, or `None` when path and query were already clean.
fn sanitize_uri(uri: &Uri, report: &mut SanitizeReport) -> AppResult<Option<Uri>> {
    let path = sanitize_path(uri.path());
    let path_changed = !matches!(path, std::borrow::Cow::Borrowed(_));

    let query = match uri.query() {
        Some(query) => {
            let (cleaned, query_report) = sanitize_form(query);
            if query_report.is_clean() {
                None
            } else {
                report.removed_keys += query_report.removed_keys;
                report.escaped_strings += query_report.escaped_strings;
                Some(cleaned)
            }
        }
        None => None,
    };

    if !path_changed && query.is_none() {
        return Ok(None);
    }

    let query = query.or_else(|| uri.query().map(str::to_owned));
    let path_and_query = match query.as_deref() {
        Some(q) if !q.is_empty() => format!("{path}?{q}"),
        _ => path.into_owned(),
    };

    let mut uri_parts = uri.clone().into_parts();
    uri_parts.path_and_query = Some(
        PathAndQuery::try_from(path_and_query)
            .map_err(|_| AppError::bad_request("Invalid request URI"))?,
    );

    Uri::from_parts(uri_parts)
        .map(Some)
        .map_err(|_| AppError::bad_request("Invalid request URI"))
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Buffer the body, failing once more than `limit` bytes arrive.
async fn collect_body(body: Body, limit: usize) -> AppResult<Bytes> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(AppError::payload_too_large(limit)),
        Err(e) => {
            debug!(error = %e, "Request body stream failed, treating as aborted");
            Err(AppError::bad_request("Invalid request body"))
        }
    }
}

/// Parse and clean a JSON body. `None` when nothing changed.
fn sanitize_json_body(raw: &[u8], report: &mut SanitizeReport) -> AppResult<Option<Bytes>> {
    let mut value: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| AppError::bad_request(describe_serde_message(&e.to_string())))?;

    let json_report = sanitize_value(&mut value);
    if json_report.is_clean() {
        return Ok(None);
    }

    report.removed_keys += json_report.removed_keys;
    report.escaped_strings += json_report.escaped_strings;

    Ok(Some(Bytes::from(serde_json::to_vec(&value)?)))
}
