//! Upload coordination: single-file accept with whole-object dedupe,
//! per-chunk accept under the distributed lock, and merge admission.
//!
//! Every handler applies the same locality rule: if the scratch directory
//! for the uid is not on this node, the request is forwarded verbatim to
//! the owner discovered via locate fan-out.

use super::{forward_unless_local, receive_file_field, Locality};
use crate::api::{ok, ApiError, AppState};
use crate::coord::DistLock;
use crate::meta::{
    chunk_object_name, MetaRecord, PartRecord, TaskKind, TaskPayload, STATUS_COMPLETE,
};
use crate::scratch::detect_content_type;
use crate::signer::check_link_window;
use axum::extract::{Query, Request, State};
use axum::response::Response;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub uid: String,
    pub md5: String,
    pub date: String,
    pub expire: String,
    pub signature: String,
}

/// `PUT /upload`: accept a whole object.
#[instrument(skip(state, req), fields(uid = %query.uid))]
pub async fn upload_single(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
    req: Request,
) -> Result<Response, ApiError> {
    let uid = check_link_window(&query.uid, &query.date, &query.expire)?;
    if !state
        .signer
        .check_upload(&query.date, &query.expire, &query.signature)
    {
        return Err(ApiError::Param("signature check failed".into()));
    }

    let meta = state
        .meta
        .meta_by_uid(uid)?
        .ok_or_else(|| ApiError::NotFound("upload link invalid, uid not found".into()))?;

    // Instant upload: identical content already stored under another uid.
    if let Some(source) = state.meta.completed_by_md5(&[query.md5.clone()])?.first() {
        info!("dedupe hit for uid {} via uid {}", uid, source.uid);
        state.meta.complete_dedupe(uid, &query.md5, source)?;
        state
            .scratch
            .remove(uid)
            .await
            .map_err(|e| ApiError::Store(format!("remove scratch for {uid} failed: {e}")))?;
        cache_fresh_meta(&state, uid).await?;
        return Ok(ok(""));
    }

    let req = match forward_unless_local(&state, uid, req).await? {
        Locality::Forwarded(response) => return Ok(response),
        Locality::Local(req) => req,
    };

    let dest = state.scratch.file(uid, &meta.storage_name);
    let (computed_md5, size) = receive_file_field(&state, req, &dest).await?;
    if computed_md5 != query.md5 {
        return Err(ApiError::Param(format!(
            "md5 check failed: computed {computed_md5}, expected {}",
            query.md5
        )));
    }

    let content_type = detect_content_type(&dest)
        .await
        .map_err(|e| ApiError::Store(format!("content-type detection failed: {e}")))?;
    state
        .store
        .put_object(&meta.bucket, &meta.storage_name, &dest, &content_type)
        .await?;

    state
        .meta
        .complete_single(uid, &computed_md5, size, &content_type)?;
    state
        .scratch
        .remove(uid)
        .await
        .map_err(|e| ApiError::Store(format!("remove scratch for {uid} failed: {e}")))?;
    cache_fresh_meta(&state, uid).await?;
    Ok(ok(""))
}

#[derive(Debug, Deserialize)]
pub struct ChunkQuery {
    pub uid: String,
    pub md5: String,
    #[serde(rename = "chunkNum")]
    pub chunk_num: String,
    pub date: String,
    pub expire: String,
    pub signature: String,
}

/// `PUT /upload/multi`: accept one chunk. Chunks arrive out of order and
/// in parallel; the per-(uid, chunk, md5) lock plus the part primary key
/// make replays no-ops.
#[instrument(skip(state, req), fields(uid = %query.uid, chunk = %query.chunk_num))]
pub async fn upload_part(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChunkQuery>,
    req: Request,
) -> Result<Response, ApiError> {
    let uid = check_link_window(&query.uid, &query.date, &query.expire)?;
    let chunk_num: i64 = query
        .chunk_num
        .parse()
        .map_err(|_| ApiError::Param(format!("invalid chunkNum: {}", query.chunk_num)))?;
    if !state
        .signer
        .check_upload(&query.date, &query.expire, &query.signature)
    {
        return Err(ApiError::Param("signature check failed".into()));
    }

    let meta = state
        .meta
        .meta_by_uid(uid)?
        .ok_or_else(|| ApiError::NotFound("upload link invalid, uid not found".into()))?;

    // Locality first: the owner takes the lock, so a forwarded request
    // never contends with its own relay.
    let req = match forward_unless_local(&state, uid, req).await? {
        Locality::Forwarded(response) => return Ok(response),
        Locality::Local(req) => req,
    };

    let lock = DistLock::new(
        state.coord.clone(),
        DistLock::chunk_key(uid, chunk_num, &query.md5),
    );
    if !lock.acquire().await? {
        return Err(ApiError::Busy);
    }
    let result = accept_chunk(&state, &meta, uid, chunk_num, &query.md5, req).await;
    if let Err(e) = lock.release().await {
        warn!("releasing chunk lock for {}/{} failed: {}", uid, chunk_num, e);
    }
    result
}

async fn accept_chunk(
    state: &Arc<AppState>,
    meta: &MetaRecord,
    uid: i64,
    chunk_num: i64,
    md5: &str,
    req: Request,
) -> Result<Response, ApiError> {
    // Idempotency under the lock: an identical accepted chunk is a no-op.
    if state.meta.part_exists(uid, chunk_num, md5)? {
        return Ok(ok(""));
    }

    let dest = state.scratch.chunk_file(uid, chunk_num);
    let (computed_md5, size) = receive_file_field(state, req, &dest).await?;
    if computed_md5 != md5 {
        return Err(ApiError::Param(format!(
            "md5 check failed: computed {computed_md5}, expected {md5}"
        )));
    }

    let object = chunk_object_name(uid, chunk_num);
    state
        .store
        .put_object(&meta.bucket, &object, &dest, "application/octet-stream")
        .await?;

    let now = chrono::Utc::now();
    state.meta.insert_part(&PartRecord {
        storage_uid: uid,
        chunk_num,
        bucket: meta.bucket.clone(),
        storage_name: object,
        storage_size: size,
        part_md5: computed_md5,
        status: 1,
        created_at: now,
        updated_at: now,
    })?;
    Ok(ok(""))
}

#[derive(Debug, Deserialize)]
pub struct MergeQuery {
    pub uid: String,
    pub md5: String,
    pub num: String,
    pub size: String,
    pub date: String,
    pub expire: String,
    pub signature: String,
}

/// `PUT /upload/merge`: admit a completed multipart upload. Metadata
/// flips to complete here; the byte-level merge runs asynchronously in
/// the task engine, and downloads reassemble from chunks until it lands.
#[instrument(skip(state, req), fields(uid = %query.uid))]
pub async fn upload_merge(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MergeQuery>,
    req: Request,
) -> Result<Response, ApiError> {
    let uid = check_link_window(&query.uid, &query.date, &query.expire)?;
    let num: i64 = query
        .num
        .parse()
        .map_err(|_| ApiError::Param(format!("invalid num: {}", query.num)))?;
    let size: i64 = query
        .size
        .parse()
        .map_err(|_| ApiError::Param(format!("invalid size: {}", query.size)))?;
    if !state
        .signer
        .check_upload(&query.date, &query.expire, &query.signature)
    {
        return Err(ApiError::Param("signature check failed".into()));
    }

    if state.meta.meta_by_uid(uid)?.is_none() {
        return Err(ApiError::NotFound("merge link invalid, uid not found".into()));
    }

    let parts = state.meta.parts_by_uid(uid)?;
    if parts.len() as i64 != num {
        // Orphaned chunks: hand them to the part-delete task and reject.
        state.meta.create_task(
            TaskKind::PartDelete,
            &TaskPayload {
                storage_uid: uid,
                chunk_sum: num,
            },
        )?;
        return Err(ApiError::Param(format!(
            "chunk count mismatch: declared {num}, accepted {}",
            parts.len()
        )));
    }

    match forward_unless_local(&state, uid, req).await? {
        Locality::Forwarded(response) => return Ok(response),
        Locality::Local(_) => {}
    }

    // Content type comes from the first chunk's leading bytes.
    let first = state.scratch.chunk_file(uid, parts[0].chunk_num);
    let content_type = detect_content_type(&first)
        .await
        .map_err(|e| ApiError::Store(format!("content-type detection failed: {e}")))?;

    state
        .meta
        .complete_multipart(uid, num, &query.md5, size, &content_type)?;
    state.meta.create_task(
        TaskKind::PartMerge,
        &TaskPayload {
            storage_uid: uid,
            chunk_sum: num,
        },
    )?;

    cache_fresh_meta(&state, uid).await?;
    state.cache.put_parts(uid, &parts).await;
    info!("merge accepted for uid {} ({} chunks)", uid, num);
    Ok(ok(""))
}

#[derive(Debug, Deserialize)]
pub struct ScratchQuery {
    pub uid: String,
}

/// `DELETE /upload?uid=`: drop the local scratch directory. Used by the
/// part-delete task against the owning node.
pub async fn delete_scratch(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScratchQuery>,
) -> Result<Response, ApiError> {
    let uid: i64 = query
        .uid
        .parse()
        .map_err(|_| ApiError::Param(format!("invalid uid: {}", query.uid)))?;
    state
        .scratch
        .remove(uid)
        .await
        .map_err(|e| ApiError::Store(format!("remove scratch for {uid} failed: {e}")))?;
    Ok(ok(""))
}

/// Re-read the row and seed the hot cache with the completed state.
async fn cache_fresh_meta(state: &Arc<AppState>, uid: i64) -> Result<(), ApiError> {
    let fresh = state
        .meta
        .meta_by_uid(uid)?
        .ok_or(ApiError::Internal)?;
    debug_assert_eq!(fresh.status, STATUS_COMPLETE);
    state.cache.put_meta(&fresh).await;
    Ok(())
}
