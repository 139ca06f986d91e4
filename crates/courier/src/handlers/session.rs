//! Session HTTP handlers: status, pairing code and logout.

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::gateway::{PairingFormat, PairingLookup};
use crate::response;
use crate::server::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
pub struct StatusResponse {
    connected: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct QrQuery {
    format: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrJsonResponse {
    qr: String,
    generated_at: i64,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /status
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        connected: state.gateway.status(),
    })
}

/// GET /qr
///
/// - `204` once connected (stop polling)
/// - `503` until a pairing code has been issued
/// - PNG by default, `{qr, generatedAt}` with `?format=json` or
///   `Accept: application/json`
///
/// A query string that fails to parse counts as absent.
pub async fn qr(
    State(state): State<AppState>,
    query: Result<Query<QrQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Response {
    let query = query.map(|Query(q)| q).unwrap_or_default();
    let format = if wants_json(&query, &headers) {
        PairingFormat::Structured
    } else {
        PairingFormat::Image
    };

    match state.gateway.pairing_artifact(format) {
        PairingLookup::AlreadyConnected => StatusCode::NO_CONTENT.into_response(),
        PairingLookup::NotAvailable => {
            response::service_unavailable("pairing code not available yet")
        }
        PairingLookup::Image(png) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, "image/png")], png).into_response()
        }
        PairingLookup::Structured {
            data_uri,
            issued_at_ms,
        } => Json(QrJsonResponse {
            qr: data_uri,
            generated_at: issued_at_ms,
        })
        .into_response(),
    }
}

/// POST /logout
pub async fn logout(State(state): State<AppState>) -> Response {
    match state.gateway.logout().await {
        Ok(()) => response::ok().into_response(),
        Err(e) => e.into_response(),
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn wants_json(query: &QrQuery, headers: &HeaderMap) -> bool {
    if query.format.as_deref() == Some("json") {
        return true;
    }
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"))
}
