//! Error types for the figures server

use axum::{
    extract::multipart::MultipartError,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::engine::EngineError;
use crate::extraction::ExtractionError;
use crate::gate::RateLimitExceeded;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{source}")]
    Extraction {
        correlation_id: String,
        #[source]
        source: ExtractionError,
    },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Multipart error: {0}")]
    Multipart(#[from] MultipartError),
}

impl AppError {
    /// Attach the request's correlation ID to an extraction failure
    pub fn extraction(correlation_id: impl Into<String>, source: ExtractionError) -> Self {
        AppError::Extraction {
            correlation_id: correlation_id.into(),
            source,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Extraction { source, .. } => match source {
                ExtractionError::Validation(_) => StatusCode::BAD_REQUEST,
                ExtractionError::QueuingTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
                ExtractionError::Engine(EngineError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
                ExtractionError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Internal(_) | AppError::Io(_) | AppError::Multipart(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::RateLimited(_) => "rate_limited",
            AppError::NotFound(_) => "not_found",
            AppError::Extraction { source, .. } => match source {
                ExtractionError::Validation(_) => "validation_error",
                ExtractionError::QueuingTimeout { .. } => "queue_timeout",
                ExtractionError::Engine(EngineError::Timeout(_)) => "engine_timeout",
                ExtractionError::Engine(_) => "engine_failure",
            },
            AppError::Internal(_) | AppError::Io(_) | AppError::Multipart(_) => "internal_error",
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        let (message, correlation_id) = match &self {
            AppError::Extraction {
                correlation_id,
                source,
            } => {
                // Validation failures are the caller's problem; everything else is ours
                let correlation_id = match source {
                    ExtractionError::Validation(_) => None,
                    _ => Some(correlation_id.clone()),
                };
                (self.to_string(), correlation_id)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ("An internal error occurred".to_string(), None)
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                ("IO error".to_string(), None)
            }
            AppError::Multipart(e) => {
                // Malformed bodies are reported as-is so clients can fix them
                tracing::warn!("Multipart error: {}", e);
                (format!("Failed to read upload: {}", e.body_text()), None)
            }
            _ => (self.to_string(), None),
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: message,
                code,
                correlation_id,
            }),
        )
            .into_response();

        if let AppError::RateLimited(e) = &self {
            if let Ok(value) = HeaderValue::from_str(&e.retry_after_secs().to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}
