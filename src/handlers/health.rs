//! Liveness endpoint.
//!
//! `GET /health` sits outside the resource groups but still passes through
//! the full pipeline, so probes are sanitized and rate limited like any
//! other client.

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub environment: String,
    pub uptime_seconds: u64,
    /// Clients currently in the rate-limit table
    pub rate_limit_clients: usize,
    pub timestamp: DateTime<Utc>,
}

/// Always 200 while the process is serving.
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "environment": "production",
///   "uptime_seconds": 3600,
///   "rate_limit_clients": 12,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.environment.to_string(),
        uptime_seconds: state.uptime_seconds(),
        rate_limit_clients: state.rate_limit_store().len(),
        timestamp: Utc::now(),
    })
}
