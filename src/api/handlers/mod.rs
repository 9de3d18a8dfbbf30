//! Request handlers, grouped by concern.

pub mod download;
pub mod health;
pub mod link;
pub mod proxy;
pub mod resume;
pub mod upload;

use super::{ApiError, AppState};
use axum::extract::multipart::Multipart;
use axum::extract::{FromRequest, Request};
use axum::response::Response;
use md5::{Digest, Md5};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Outcome of the scratch-locality check.
pub(crate) enum Locality {
    /// This node owns the scratch directory; consume the request here.
    Local(Request),
    /// A peer owns it; its response is relayed verbatim.
    Forwarded(Response),
}

/// Resolve scratch locality for `uid`, forwarding to the owner when the
/// directory is not on this node.
pub(crate) async fn forward_unless_local(
    state: &Arc<AppState>,
    uid: i64,
    req: Request,
) -> Result<Locality, ApiError> {
    if state.scratch.exists(uid).await {
        return Ok(Locality::Local(req));
    }
    let owner = state.peers.locate_owner(uid).await?;
    info!("uid {} owned by {}, forwarding", uid, owner);
    let response = state.peers.forward(&owner, req).await?;
    Ok(Locality::Forwarded(response))
}

/// Drain the `file` field of a multipart body into `dest`, hashing MD5
/// while streaming. Returns `(md5_hex, byte_count)`.
pub(crate) async fn receive_file_field(
    state: &Arc<AppState>,
    req: Request,
    dest: &Path,
) -> Result<(String, i64), ApiError> {
    let mut multipart = Multipart::from_request(req, state)
        .await
        .map_err(|e| ApiError::Param(format!("invalid multipart body: {e}")))?;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Param(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let mut out = tokio::fs::File::create(dest)
            .await
            .map_err(|e| ApiError::Store(format!("create {dest:?} failed: {e}")))?;
        let mut hasher = Md5::new();
        let mut written: i64 = 0;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::Param(format!("read upload body failed: {e}")))?
        {
            hasher.update(&chunk);
            written += chunk.len() as i64;
            out.write_all(&chunk)
                .await
                .map_err(|e| ApiError::Store(format!("write {dest:?} failed: {e}")))?;
        }
        out.flush()
            .await
            .map_err(|e| ApiError::Store(format!("flush {dest:?} failed: {e}")))?;
        return Ok((hex::encode(hasher.finalize()), written));
    }
    Err(ApiError::Param("multipart body has no file field".into()))
}
