//! Application routing configuration with the request pipeline.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │  Error Handler   │ ← logs + renders every failure for APP_ENV
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Catch Panic    │ ← panic → programming error (500)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Access Log      │ ← development only
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Security Headers │
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers, preflight
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Sanitization    │ ← 400 malformed JSON, 413 body too large
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Client Identity  │ ← ClientIp (proxy trust policy)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Compression    │
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Instrumentation  │ ← requestedTime, X-Request-Id
//! └────────┬─────────┘
//!          ▼
//!   /health | prefix dispatch → 404
//! ```
//!
//! # Route Groups
//!
//! - `/health` - Liveness probe
//! - `/api/v1/users`, `/api/v1/products`, `/api/v1/categories` - Documents
//! - `/api/v1/reports` - Collection summary

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::get;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::catalog::Collection;
use crate::dispatch::{self, Dispatcher};
use crate::error::{AppError, AppResult};
use crate::handlers::{self, reports::report_routes, resources::resource_routes};
use crate::middleware::{
    ErrorHandlerLayer, ProxyTrust, RateLimitLayer, SanitizeLayer, identify_client, instrument,
    panic_response, security_headers,
};
use crate::state::AppState;

/// Prefix shared by the resource groups.
pub const API_PREFIX: &str = "/api/v1";

/// The default resource groups in registration order.
pub fn default_groups(state: &AppState) -> Vec<(String, Router)> {
    let mut groups: Vec<(String, Router)> = Collection::ALL
        .iter()
        .map(|c| {
            (
                format!("{API_PREFIX}/{}", c.name()),
                resource_routes(state.catalog.clone(), *c),
            )
        })
        .collect();

    groups.push((
        format!("{API_PREFIX}/reports"),
        report_routes(state.catalog.clone()),
    ));
    groups
}

/// Build the application router with the default resource groups.
///
/// # Errors
///
/// Returns `AppError::ConfigError` if the pipeline configuration is invalid.
pub fn build_router(state: AppState) -> AppResult<Router> {
    let groups = default_groups(&state);
    build_router_with_groups(state, groups)
}

/// Build the full pipeline around an explicit list of `(prefix, router)`
/// groups. Groups are matched in the given order.
///
/// # Errors
///
/// Returns `AppError::ConfigError` for invalid or duplicate prefixes and
/// for an invalid rate-limit configuration.
pub fn build_router_with_groups(
    state: AppState,
    groups: Vec<(String, Router)>,
) -> AppResult<Router> {
    let config = state.config.clone();

    let mut dispatcher = Dispatcher::builder();
    for (prefix, group) in groups {
        dispatcher = dispatcher.mount(&prefix, group)?;
    }
    let dispatcher = dispatcher.build();
    info!(groups = ?dispatcher, "Resource groups mounted");

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .method_not_allowed_fallback(dispatch::not_found)
        .fallback_service(dispatcher);

    // =========================================================================
    // Apply Middleware Stack (each layer wraps the ones added before it)
    // =========================================================================

    // 1. Instrumentation: innermost, runs right before routing
    router = router.layer(axum::middleware::from_fn(instrument));

    // 2. Compression
    router = router.layer(CompressionLayer::new());

    // 3. Rate Limiting (if enabled)
    match state
        .rate_limiter()
        .map_err(|e| AppError::ConfigError(e.to_string()))?
    {
        Some(limiter) => {
            info!(
                max = config.rate_limit_max,
                window_secs = config.rate_limit_window.as_secs(),
                "Rate limiting enabled"
            );
            router = router.layer(RateLimitLayer::new(limiter));
        }
        None => info!("Rate limiting disabled (RATE_LIMIT_MAX=0)"),
    }

    // 3a. Client identity, stored whether or not limiting is on
    info!(
        trust_proxy = config.trust_proxy,
        trusted_proxies = config.trusted_proxies.len(),
        "Client identity resolution configured"
    );
    let trust = ProxyTrust::new(config.trust_proxy, &config.trusted_proxies);
    router = router.layer(axum::middleware::from_fn_with_state(trust, identify_client));

    // 4. Sanitization and body limit
    info!(
        max_body_bytes = config.max_request_body_size,
        "Request body size limit configured"
    );
    router = router.layer(SanitizeLayer::new(config.max_request_body_size));

    // 5. CORS
    router = router.layer(build_cors_layer(&config.cors_allowed_origins));

    // 6. Security headers
    router = router.layer(axum::middleware::from_fn(security_headers));

    // 7. Access log (development only)
    if config.environment.is_development() {
        router = router.layer(TraceLayer::new_for_http());
    }

    // 8. Panics become programming errors
    router = router.layer(CatchPanicLayer::custom(panic_response));

    // 9. Global error handler: outermost, sees every failure
    router = router.layer(ErrorHandlerLayer::new(config.environment));

    Ok(router.with_state(state))
}

/// Build CORS layer from configuration.
///
/// `["*"]` allows any origin. Unparseable origins are skipped with a warning.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| {
                let parsed: Option<HeaderValue> = o.parse().ok();
                if parsed.is_none() {
                    warn!(origin = %o, "Invalid CORS origin, skipping");
                }
                parsed
            })
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
