//! HTTP error mapping for the attachment service

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use blobrelay_core::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Request-level errors with their HTTP status classes.
///
/// Client mistakes are 4xx and never retried server-side; capacity and
/// internal failures are 5xx; an unresolvable peer address is a bad-gateway
/// condition that fails the request before any rate or quota check.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing declared length")]
    MissingLength,

    #[error("invalid declared length: {0}")]
    InvalidLength(String),

    #[error("{0}")]
    TooLarge(String),

    #[error("{0}")]
    RateLimited(String),

    #[error("{0}")]
    LengthMismatch(String),

    #[error("could not resolve peer address")]
    PeerAddress,

    #[error("{0}")]
    Capacity(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::TooLarge { .. } => ApiError::TooLarge(message),
            StoreError::RateLimited { .. } => ApiError::RateLimited(message),
            StoreError::LengthMismatch { .. } => ApiError::LengthMismatch(message),
            StoreError::InsufficientSpace { .. }
            | StoreError::NoEvictableBlob
            | StoreError::RetentionFloor { .. } => ApiError::Capacity(message),
            StoreError::IdExhausted | StoreError::Io(_) => ApiError::Internal(message),
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingLength | ApiError::InvalidLength(_) => StatusCode::BAD_REQUEST,
            ApiError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::LengthMismatch(_) => StatusCode::CONFLICT,
            ApiError::PeerAddress => StatusCode::BAD_GATEWAY,
            ApiError::Capacity(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let code = match self {
            ApiError::MissingLength => "MISSING_LENGTH",
            ApiError::InvalidLength(_) => "INVALID_LENGTH",
            ApiError::TooLarge(_) => "TOO_LARGE",
            ApiError::RateLimited(_) => "RATE_LIMITED",
            ApiError::LengthMismatch(_) => "LENGTH_MISMATCH",
            ApiError::PeerAddress => "PEER_ADDRESS",
            ApiError::Capacity(_) => "CAPACITY",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        };

        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        })
    }
}
