//! API error taxonomy and HTTP response mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use maildrip_core::{CoreError, ValidationError};
use maildrip_queue::QueueError;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the scheduling service and HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed batch input; nothing was persisted.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Operation on an unknown (or foreign) message id.
    #[error("message not found")]
    NotFound,

    /// Request is valid but conflicts with the message's current state.
    #[error("{0}")]
    Conflict(String),

    /// Caller identity is missing from the request.
    #[error("missing x-owner-id header")]
    MissingOwner,

    /// The queue or store cannot take the work right now.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(_) => Self::NotFound,
            CoreError::InvalidTransition(msg) => Self::Conflict(msg),
            CoreError::Database(msg) => Self::Unavailable(msg),
            CoreError::InvalidInput(msg) => Self::Internal(msg),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Unavailable(msg) | QueueError::Database(msg) => Self::Unavailable(msg),
            QueueError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Validation(err) => (
                StatusCode::BAD_REQUEST,
                ErrorBody { message: err.message.clone(), field: Some(err.field) },
            ),
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                ErrorBody { message: "message not found".to_string(), field: None },
            ),
            Self::Conflict(message) => (StatusCode::CONFLICT, ErrorBody { message, field: None }),
            Self::MissingOwner => (
                StatusCode::UNAUTHORIZED,
                ErrorBody { message: "missing x-owner-id header".to_string(), field: None },
            ),
            Self::Unavailable(message) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorBody { message, field: None })
            },
            Self::Internal(message) => {
                tracing::error!(error = %message, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody { message: "internal server error".to_string(), field: None },
                )
            },
        };
        (status, Json(body)).into_response()
    }
}
