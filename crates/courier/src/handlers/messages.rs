//! Outbound message handler.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::gateway::SendRequest;
use crate::response;
use crate::server::AppState;

/// POST /send
///
/// Request body: `{"to": "521234567890", "message": "..."}`
///
/// An unreadable body counts as a request without `to`/`message`, so the
/// connection check still answers first. Oversized bodies get `413`.
pub async fn send(
    State(state): State<AppState>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return response::error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "Unreadable send body");
            SendRequest::default()
        }
    };

    match state.gateway.send_message(&request).await {
        Ok(()) => response::ok().into_response(),
        Err(e) => e.into_response(),
    }
}
