//! HTTP error mapping. Every failure is answered as `{"error": message}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cmei_core::error::CmeiError;
use cmei_notify::NotifyError;

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<CmeiError> for ApiError {
    fn from(e: CmeiError) -> Self {
        let status = match &e {
            CmeiError::Validation(_) | CmeiError::Transition(_) => StatusCode::BAD_REQUEST,
            CmeiError::Unauthorized => StatusCode::UNAUTHORIZED,
            CmeiError::NotFound(_) => StatusCode::NOT_FOUND,
            CmeiError::Rejected(_) => StatusCode::CONFLICT,
            CmeiError::Config(_) | CmeiError::Database(_) | CmeiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.user_message())
    }
}

/// Gateway failures keep the downstream status; transport failures are 500.
impl From<NotifyError> for ApiError {
    fn from(e: NotifyError) -> Self {
        match e {
            NotifyError::Status { status, body } => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                let message = if body.is_empty() { format!("Downstream error {status}") } else { body };
                Self::new(status, message)
            }
            NotifyError::Invalid(msg) => Self::bad_request(msg),
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("{} {}", self.status, self.message);
        } else {
            tracing::warn!("{} {}", self.status, self.message);
        }
        (self.status, Json(serde_json::json!({"error": self.message}))).into_response()
    }
}
