//! Error responses
//!
//! Every failure leaves the service as `{"code": <status>, "message": <text>}`.

use crate::error::BgChangerError;
use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

/// Error returned by handlers
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn payload_too_large(field: &str, limit: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("field '{}' exceeds the upload limit of {} bytes", field, limit),
        )
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// HTTP status for a library error
#[must_use]
pub fn status_for(error: &BgChangerError) -> StatusCode {
    match error {
        BgChangerError::InvalidArgument(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BgChangerError::Decode(_) | BgChangerError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
        BgChangerError::Network(_) => StatusCode::BAD_GATEWAY,
        BgChangerError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<BgChangerError> for ApiError {
    fn from(error: BgChangerError) -> Self {
        let status = status_for(&error);
        if status.is_server_error() {
            tracing::error!(error = %error, "request failed");
        }
        Self::new(status, error.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        Self::new(error.status(), error.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            code: self.status.as_u16(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&BgChangerError::invalid_argument("x")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(&BgChangerError::decode("x")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&BgChangerError::unsupported_format("image/bmp")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&BgChangerError::network_error("GET", "timeout")),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status_for(&BgChangerError::not_found("job")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&BgChangerError::inference("x")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
