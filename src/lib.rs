//! # Shop Gateway
//!
//! HTTP request pipeline for a multi-resource API gateway, built on Axum:
//!
//! - **Sanitization**: operator-key removal and markup escaping on path,
//!   query and body before any handler runs
//! - **Rate Limiting**: fixed-window counter per client, injectable store
//! - **Error Contract**: operational vs programming failures, rendered by
//!   one global handler for development or production
//! - **Observability**: request IDs, structured logging, Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ErrorHandler → CatchPanic → SecurityHeaders → CORS         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Sanitize → RateLimit → Compression → Instrumentation       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Dispatcher (first prefix match) → 404                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Resource groups (users, products, categories, reports)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shop_gateway::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config);
//!     let app = build_router(state)?;
//!
//!     // Serve with `into_make_service_with_connect_info::<SocketAddr>()`...
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```bash
//! APP_ENV=development RATE_LIMIT_MAX=100 cargo run
//! ```

pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod sanitize;
pub mod shutdown;
pub mod state;

// Re-exports for convenience
pub use config::{Config, Environment};
pub use error::{AppError, AppResult};
pub use limiter::{FixedWindowLimiter, MemoryStore, RateLimitStore};
pub use routes::{build_router, build_router_with_groups};
pub use state::AppState;
