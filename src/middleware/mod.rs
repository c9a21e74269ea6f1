//! Request pipeline stages.
//!
//! - **Sanitization**: strips operator keys and escapes markup in path,
//!   query and body; enforces the body size limit
//! - **Rate Limiting**: fixed-window counter per client identity
//! - **Instrumentation**: `RequestedTime`, request ID, duration metric
//! - **Security Headers**: hardening headers on every response
//! - **Error Handler**: classifies, logs and renders every failure
//! - **Client IP**: identity resolution honoring the proxy trust policy
//!
//! # Architecture
//!
//! ```text
//! Request → ErrorHandler → CatchPanic → [Trace] → SecurityHeaders → CORS
//!         → Sanitize → ClientIp → RateLimit → Compression → Instrumentation
//!              ↓                      ↓
//!          400/413                   429            → Router → 404 / handler
//! ```
//!
//! Failures from any stage are `AppError` responses; they travel back out
//! through the stack to the error handler, which always finalizes them.

pub mod error_handler;
pub mod instrumentation;
pub mod ip;
pub mod rate_limit;
pub mod sanitize;
pub mod security_headers;

pub use error_handler::{ErrorHandlerLayer, panic_response};
pub use instrumentation::{REQUEST_ID_HEADER, RequestId, RequestedTime, instrument};
pub use ip::{ClientIp, ProxyTrust, UNKNOWN_IP, identify_client, resolve_client_ip};
pub use rate_limit::{RATE_LIMIT_MESSAGE, RateLimitLayer};
pub use sanitize::SanitizeLayer;
pub use security_headers::security_headers;
