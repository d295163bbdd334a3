//! Error responses.
//!
//! Every failure leaves the server as `{"status":"error","error":"..."}`
//! with a status code chosen from the engine error kind.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    PayloadTooLarge,
    TooManyRequests(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(m)
            | ApiError::NotFound(m)
            | ApiError::TooManyRequests(m)
            | ApiError::Internal(m) => m.clone(),
            ApiError::Unauthorized => "unauthorized".into(),
            ApiError::PayloadTooLarge => "request body too large".into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.message(), "request failed");
        }
        (status, Json(json!({ "status": "error", "error": self.message() }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(e) => ApiError::BadRequest(e.to_string()),
            EngineError::NotFound(id) => ApiError::NotFound(format!("device `{id}` not found")),
            err @ (EngineError::StoreUnavailable(_) | EngineError::LogUnavailable(_)) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}
