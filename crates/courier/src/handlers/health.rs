use axum::Json;

use crate::response::{self, OkResponse};

/// GET /health
pub async fn health() -> Json<OkResponse> {
    response::ok()
}
