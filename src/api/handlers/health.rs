//! Liveness endpoints.

use crate::api::{ok, ApiError, AppState};
use axum::extract::State;
use axum::response::Response;
use std::sync::Arc;

/// `GET /health`: trivial liveness; gates the registry heartbeat.
pub async fn health() -> Response {
    ok("healthy")
}

/// `GET /ping`: exercises the SQL store and the coordination store.
pub async fn ping(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    state
        .meta
        .ping()
        .map_err(|e| ApiError::Store(format!("sql probe failed: {e}")))?;
    state
        .coord
        .ping()
        .await
        .map_err(|e| ApiError::Store(format!("coordination probe failed: {e}")))?;
    Ok(ok("pong"))
}
