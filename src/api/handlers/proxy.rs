//! Scratch-locality query answered on behalf of the peer fleet.

use crate::api::{ok, ApiError, AppState};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct LocateQuery {
    pub uid: String,
}

/// `GET /proxy?uid=`: 200 with this node's IP iff the scratch directory
/// for `uid` lives here.
pub async fn locate(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LocateQuery>,
) -> Result<Response, ApiError> {
    let uid: i64 = query
        .uid
        .parse()
        .map_err(|_| ApiError::Param(format!("invalid uid: {}", query.uid)))?;

    if state.scratch.exists(uid).await {
        Ok(ok(state.node_ip.clone()))
    } else {
        Err(ApiError::NotFound("scratch directory not on this node".into()))
    }
}
