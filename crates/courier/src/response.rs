//! JSON response helpers.
//!
//! Success bodies are `{"ok": true}`; failures are
//! `{"ok": false, "message": "..."}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::gateway::CommandError;

pub const INTERNAL_ERROR_MESSAGE: &str = "internal error";

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub message: String,
}

pub fn ok() -> Json<OkResponse> {
    Json(OkResponse { ok: true })
}

pub fn error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorResponse {
        ok: false,
        message: message.into(),
    };
    (status, Json(body)).into_response()
}

pub fn bad_request(message: impl Into<String>) -> Response {
    error(StatusCode::BAD_REQUEST, message)
}

pub fn service_unavailable(message: impl Into<String>) -> Response {
    error(StatusCode::SERVICE_UNAVAILABLE, message)
}

pub fn internal_error() -> Response {
    error(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
}

impl CommandError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamFailure { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        error(self.status_code(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverError;

    #[test]
    fn command_error_status_codes() {
        assert_eq!(
            CommandError::NotConnected.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            CommandError::invalid("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CommandError::Timeout { action: "x" }.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            CommandError::UpstreamFailure {
                action: "x",
                source: DriverError::Exited,
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
