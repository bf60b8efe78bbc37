//! Unified error handling for promptgate.
//!
//! Every failure a request can hit maps to one `ProxyError` variant, and each
//! variant maps to exactly one client-visible status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Upstream bodies are cut to this many chars before they are logged or echoed.
pub const MAX_ERROR_BODY_CHARS: usize = 500;

/// Unified error type for proxy operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyError {
    /// The request carried no prompt.
    MissingPrompt,
    /// The requested model is not in the provider catalog.
    UnknownModel(String),
    /// The model catalog could not be refreshed, so the model cannot be validated.
    CatalogUnavailable(String),
    /// The service secret was missing or wrong.
    Unauthorized,
    /// The task queue is full.
    QueueSaturated,
    /// A deadline expired while enqueueing, waiting, or talking to upstream.
    Timeout,
    /// Upstream answered with a non-success status.
    UpstreamApi { status: u16, body: String },
    /// Upstream succeeded but carried neither text nor a job to poll.
    NoText,
    /// Polling ended without usable text.
    IncompleteResponse,
    /// The polled job reached a failure state.
    FailedStatus(String),
    /// Network failure after retries were exhausted.
    Transport(String),
    /// Internal error.
    Internal(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPrompt => write!(f, "Missing required parameter 'prompt'"),
            Self::UnknownModel(model) => write!(f, "Unknown model '{}'", model),
            Self::CatalogUnavailable(msg) => {
                write!(f, "Unable to validate model: {}", msg)
            }
            Self::Unauthorized => write!(f, "Invalid or missing service secret"),
            Self::QueueSaturated => write!(f, "Server is busy, try again later"),
            Self::Timeout => write!(f, "Request timed out"),
            Self::UpstreamApi { status, body } => {
                write!(f, "Upstream API error ({}): {}", status, truncate(body))
            }
            Self::NoText => write!(f, "Upstream response contained no text"),
            Self::IncompleteResponse => {
                write!(f, "Upstream response did not complete in time")
            }
            Self::FailedStatus(status) => write!(f, "Upstream job ended with status '{}'", status),
            Self::Transport(msg) => write!(f, "Upstream request failed: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ProxyError {}

/// Cut a body down to a loggable size on a char boundary.
pub fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Error response structure for JSON serialization.
#[derive(Serialize)]
struct ErrorResponseBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    message: String,
    r#type: &'static str,
}

impl ProxyError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingPrompt => StatusCode::BAD_REQUEST,
            Self::UnknownModel(_) => StatusCode::BAD_REQUEST,
            Self::CatalogUnavailable(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::QueueSaturated => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamApi { .. } => StatusCode::BAD_GATEWAY,
            Self::NoText => StatusCode::BAD_GATEWAY,
            Self::IncompleteResponse => StatusCode::BAD_GATEWAY,
            Self::FailedStatus(_) => StatusCode::BAD_GATEWAY,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type string.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::MissingPrompt | Self::UnknownModel(_) | Self::CatalogUnavailable(_) => {
                "invalid_request"
            }
            Self::Unauthorized => "unauthorized",
            Self::QueueSaturated => "queue_saturated",
            Self::Timeout => "timeout",
            Self::UpstreamApi { .. } => "upstream_error",
            Self::NoText | Self::IncompleteResponse | Self::FailedStatus(_) => {
                "incomplete_response"
            }
            Self::Transport(_) => "transport_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponseBody {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: self.error_type(),
            },
        };
        (status, Json(body)).into_response()
    }
}
