//! Error taxonomy and the normalized report every failure is reduced to.
//!
//! Failures fall into two classes:
//!
//! - **Operational**: anticipated, client-facing (not found, rate limited,
//!   malformed body, handler validation). Status and message reach the
//!   client verbatim.
//! - **Programming**: everything else (internal errors, `anyhow` chains,
//!   panics). The client sees a 500 with a generic message outside
//!   development mode; the real message is logged for operators.
//!
//! Every `AppError` turned into a response carries an [`ErrorReport`] in the
//! response extensions. The global error handler picks it up and renders
//! the final body for the configured [`Environment`].

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::config::Environment;

/// Message substituted for programming errors outside development mode.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went very wrong!";

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Anticipated failure with a client-safe message.
    #[error("{message}")]
    Operational { status: StatusCode, message: String },

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),

    #[error("Handler panicked: {0}")]
    Panic(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// Create an operational error with an explicit status.
    ///
    /// ```rust,ignore
    /// return Err(AppError::new("You do not own this cart", StatusCode::FORBIDDEN));
    /// ```
    pub fn new(message: impl Into<String>, status: StatusCode) -> Self {
        AppError::Operational {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::BAD_REQUEST)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::NOT_FOUND)
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            format!("Request body exceeds the {limit} byte limit"),
            StatusCode::PAYLOAD_TOO_LARGE,
        )
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::TOO_MANY_REQUESTS)
    }

    /// The 404 produced when nothing is mounted at `original_url`.
    pub fn route_not_found(original_url: &str) -> Self {
        Self::not_found(format!("can not find {original_url} on this server"))
    }

    /// Whether the error was anticipated and is safe to show to clients.
    pub fn is_operational(&self) -> bool {
        matches!(self, AppError::Operational { .. })
    }

    /// Status code sent to the client. Programming errors are always 500.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Operational { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Normalize into the shape the global error handler formats.
    pub fn report(&self) -> ErrorReport {
        let detail = match self {
            // anyhow's Debug output carries the full cause chain
            AppError::Unexpected(e) => format!("{e:?}"),
            other => format!("{other:?}"),
        };

        ErrorReport {
            status: self.status_code(),
            operational: self.is_operational(),
            message: self.to_string(),
            detail,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Production shape until the global error handler re-renders it
        self.report().render(Environment::Production)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match &rejection {
            JsonRejection::JsonDataError(_) => describe_serde_message(&rejection.body_text()),
            JsonRejection::JsonSyntaxError(_) => "Malformed JSON in request body".to_string(),
            JsonRejection::MissingJsonContentType(_) => {
                "Expected request with `Content-Type: application/json`".to_string()
            }
            JsonRejection::BytesRejection(_) => "Failed to read request body".to_string(),
            _ => "Invalid request body".to_string(),
        };

        AppError::new(message, rejection.status())
    }
}

/// A failure normalized for response formatting.
///
/// Stored in response extensions so the outermost error handler can find
/// it regardless of which stage produced the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub status: StatusCode,
    pub operational: bool,
    /// Original message. Only shown to clients for operational errors or in
    /// development mode.
    pub message: String,
    /// Operator-facing detail (debug rendering with cause chain).
    pub detail: String,
}

/// Error body sent to clients.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub status: &'static str,
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<&'a str>,
}

/// Classification details, development mode only.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub status_code: u16,
    pub is_operational: bool,
}

impl ErrorReport {
    /// `"fail"` for client errors, `"error"` for everything else.
    pub fn status_label(&self) -> &'static str {
        if self.status.is_client_error() {
            "fail"
        } else {
            "error"
        }
    }

    pub fn body(&self, environment: Environment) -> ErrorBody<'_> {
        match environment {
            Environment::Development => ErrorBody {
                status: self.status_label(),
                message: &self.message,
                error: Some(ErrorDetail {
                    status_code: self.status.as_u16(),
                    is_operational: self.operational,
                }),
                stack: Some(&self.detail),
            },
            Environment::Production if self.operational => ErrorBody {
                status: self.status_label(),
                message: &self.message,
                error: None,
                stack: None,
            },
            Environment::Production => ErrorBody {
                status: "error",
                message: GENERIC_ERROR_MESSAGE,
                error: None,
                stack: None,
            },
        }
    }

    /// Build the JSON response, keeping the report attached.
    pub fn render(&self, environment: Environment) -> Response {
        let mut response = (self.status, Json(self.body(environment))).into_response();
        response.extensions_mut().insert(self.clone());
        response
    }
}

/// Reduce serde messages to something that does not leak internal type names.
pub fn describe_serde_message(msg: &str) -> String {
    if msg.contains("missing field")
        && let Some(field) = backticked(msg)
    {
        return format!("Missing required field: {field}");
    }

    if msg.contains("unknown field")
        && let Some(field) = backticked(msg)
    {
        return format!("Unknown field: {field}");
    }

    if msg.contains("invalid type") {
        return "Invalid data type in request body".to_string();
    }

    if msg.contains("EOF while parsing") || msg.contains("expected") {
        return "Malformed JSON in request body".to_string();
    }

    "Invalid request format".to_string()
}

fn backticked(msg: &str) -> Option<&str> {
    let start = msg.find('`')? + 1;
    let len = msg.get(start..)?.find('`')?;
    msg.get(start..start + len)
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
