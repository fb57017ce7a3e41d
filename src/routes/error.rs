use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::orchestrator::{InputError, LookupError, SubmitError};

/// Error body returned by every API route: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<InputError> for ApiError {
    fn from(err: InputError) -> Self {
        let status = match err {
            InputError::NotAnImage => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            InputError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.to_string())
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Busy => Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
            SubmitError::InvalidInput(input) => input.into(),
        }
    }
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        Self::new(StatusCode::NOT_FOUND, err.to_string())
    }
}
