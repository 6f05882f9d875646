//! Unified error envelope.
//!
//! Every failure leaving the service is rendered as
//! `{"error": <status phrase>, "code": <status>, "details": <str | [str] | null>}`.
//! Client-caused (4xx) failures carry a human readable detail; 5xx failures
//! always answer `details: null` and keep the cause in the server log.

use std::any::Any;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::transcriber::TranscriberError;

/// Wire shape of every error response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub code: u16,
    pub details: Details,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Details {
    Text(String),
    List(Vec<String>),
    None,
}

impl ErrorEnvelope {
    pub fn new(status: StatusCode, details: Details) -> Self {
        Self {
            error: status_phrase(status).to_string(),
            code: status.as_u16(),
            details,
        }
    }
}

pub fn status_phrase(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("Error")
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("memory usage {percent:.1}% exceeds threshold {threshold:.1}%")]
    MemoryPressure { percent: f64, threshold: f64 },
    #[error("unsupported file type: {extension:?}")]
    UnsupportedMediaType { extension: String },
    #[error("payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("no admission permit within timeout")]
    Busy { retry_after_secs: u64 },
    #[error("malformed request: {}", .0.join("; "))]
    BadRequest(Vec<String>),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found")]
    NotFound,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("transcription backend failed: {0}")]
    Backend(#[from] TranscriberError),
    #[error("transcription exceeded its deadline")]
    BackendTimeout,
    #[error("internal error: {0}")]
    Internal(String),
}

impl GateError {
    pub fn status(&self) -> StatusCode {
        match self {
            GateError::MemoryPressure { .. } | GateError::Busy { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GateError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            GateError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GateError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GateError::Forbidden(_) => StatusCode::FORBIDDEN,
            GateError::NotFound => StatusCode::NOT_FOUND,
            GateError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            GateError::BackendTimeout => StatusCode::GATEWAY_TIMEOUT,
            GateError::Backend(_) | GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing envelope. Server errors never expose their cause.
    pub fn envelope(&self) -> ErrorEnvelope {
        let details = match self {
            GateError::MemoryPressure { .. } => {
                Details::Text("Service under memory pressure. Please try again later.".into())
            }
            GateError::UnsupportedMediaType { extension } => {
                let shown = if extension.is_empty() {
                    "unknown".to_string()
                } else {
                    format!(".{}", extension)
                };
                Details::Text(format!("Unsupported file type: {}", shown))
            }
            GateError::PayloadTooLarge { .. } => {
                Details::Text("File exceeds maximum allowed size.".into())
            }
            GateError::Busy { .. } => {
                Details::Text("All workers are currently busy. Please try again later.".into())
            }
            GateError::BadRequest(items) if items.is_empty() => {
                Details::List(vec!["Invalid request".into()])
            }
            GateError::BadRequest(items) => Details::List(items.clone()),
            GateError::Forbidden(msg) => Details::Text(msg.clone()),
            GateError::NotFound => Details::Text("Not Found".into()),
            GateError::MethodNotAllowed => Details::Text("Method Not Allowed".into()),
            GateError::Backend(_) | GateError::BackendTimeout | GateError::Internal(_) => {
                Details::None
            }
        };
        ErrorEnvelope::new(self.status(), details)
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, Json(self.envelope())).into_response();
        if let GateError::Busy { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

/// Panic handler for `CatchPanicLayer`: a generic 500 envelope, the payload
/// only goes to the log.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    tracing::error!(panic = %message, "handler panicked");
    GateError::Internal(message.to_string()).into_response()
}

/// Router fallback for unknown paths.
pub async fn not_found() -> Response {
    GateError::NotFound.into_response()
}
