//! Global error handler: the terminal stage for every failure.
//!
//! Every stage and handler reports failures by returning an [`AppError`],
//! whose response carries an [`ErrorReport`] extension. This layer sits
//! outermost, so it sees all of them:
//!
//! 1. Logs the failure (`warn` for operational, `error` for programming
//!    errors, with the internal detail).
//! 2. Records the error counter.
//! 3. Re-renders the body for the configured [`Environment`].
//!
//! Error statuses produced without a report (framework rejections) are
//! normalized too, so clients always receive the JSON error shape.
//!
//! Panics are turned into [`AppError::Panic`] by [`panic_response`], which
//! is installed with `tower_http::catch_panic` inside this layer.

use std::any::Any;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{error, warn};

use crate::config::Environment;
use crate::error::{AppError, ErrorReport};
use crate::metrics;

#[derive(Debug, Clone, Copy)]
pub struct ErrorHandlerLayer {
    environment: Environment,
}

impl ErrorHandlerLayer {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }
}

impl<S> Layer<S> for ErrorHandlerLayer {
    type Service = ErrorHandlerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ErrorHandlerService {
            inner,
            environment: self.environment,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorHandlerService<S> {
    inner: S,
    environment: Environment,
}

impl<S> Service<Request<Body>> for ErrorHandlerService<S>
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
        let environment = self.environment;
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let response = inner.call(req).await?;

            let report = match response.extensions().get::<ErrorReport>() {
                Some(report) => report.clone(),
                None if is_failure(&response) => unreported_failure(&response).report(),
                None => return Ok(response),
            };

            if report.operational {
                warn!(
                    method = %method,
                    path = %path,
                    status = report.status.as_u16(),
                    message = %report.message,
                    "Operational error"
                );
            } else {
                error!(
                    method = %method,
                    path = %path,
                    status = report.status.as_u16(),
                    message = %report.message,
                    detail = %report.detail,
                    "Programming error"
                );
            }
            metrics::record_error(report.operational, report.status.as_u16());

            Ok(finalize(response, &report, environment))
        })
    }
}

fn is_failure(response: &Response<Body>) -> bool {
    let status = response.status();
    status.is_client_error() || status.is_server_error()
}

/// Error responses that did not come from an [`AppError`].
fn unreported_failure(response: &Response<Body>) -> AppError {
    let status = response.status();
    if status.is_client_error() {
        AppError::new(status.canonical_reason().unwrap_or("Request failed"), status)
    } else {
        AppError::Internal(format!("{status} response produced without an error report"))
    }
}

/// Replace the body with the rendering for `environment`, keeping the
/// headers other stages set (rate-limit, request id, CORS).
fn finalize(
    response: Response<Body>,
    report: &ErrorReport,
    environment: Environment,
) -> Response<Body> {
    let (mut parts, _stale_body) = response.into_parts();
    let (rendered_parts, body) = report.render(environment).into_parts();

    // The old body may have been compressed; the new one is not
    parts.headers.remove(CONTENT_ENCODING);
    parts.headers.remove(CONTENT_LENGTH);
    if let Some(content_type) = rendered_parts.headers.get(CONTENT_TYPE) {
        parts.headers.insert(CONTENT_TYPE, content_type.clone());
    }

    parts.status = rendered_parts.status;
    parts.extensions.insert(report.clone());

    Response::from_parts(parts, body)
}

/// Response for a caught panic, for `CatchPanicLayer::custom`.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let message = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic payload".to_string()
    };

    AppError::Panic(message).into_response()
}
