//! Range-aware downloads with transparent reassembly of multipart
//! objects whose merge task has not run yet.

use crate::api::{ApiError, AppState};
use crate::meta::{MetaRecord, STATUS_COMPLETE};
use crate::signer::check_link_window;
use crate::storage::ObjectStore;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub uid: String,
    pub name: String,
    pub date: String,
    pub expire: String,
    pub bucket: String,
    pub object: String,
    pub signature: String,
}

/// `GET /download`: honors `Range`. Non-multipart objects stream
/// straight from the store; multipart objects whose merge is pending are
/// reassembled from their chunks by cumulative offset.
#[instrument(skip(state, headers), fields(uid = %query.uid))]
pub async fn download(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let uid = check_link_window(&query.uid, &query.date, &query.expire)?;
    if !state.signer.check_download(
        &query.date,
        &query.expire,
        &query.bucket,
        &query.object,
        &query.signature,
    ) {
        return Err(ApiError::Param("signature check failed".into()));
    }

    // Hot cache first, SQL as the fallback.
    let meta = match state.cache.get_meta(uid).await? {
        Some(meta) => meta,
        None => state
            .meta
            .meta_by_uid(uid)?
            .ok_or_else(|| ApiError::NotFound("uid not found".into()))?,
    };
    if meta.status != STATUS_COMPLETE {
        return Err(ApiError::NotFound("upload not complete".into()));
    }

    let size = meta.storage_size;
    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let (start, end) = parse_range(range_header.as_deref(), size)
        .ok_or_else(|| ApiError::Param("invalid range".into()))?;

    let body = if !meta.multi_part {
        whole_object_body(&state, &meta, start, end).await?
    } else if state
        .store
        .stat_object(&meta.bucket, &meta.storage_name)
        .await?
        .is_some()
    {
        // The merge task already produced the blob.
        whole_object_body(&state, &meta, start, end).await?
    } else {
        reassembled_body(&state, &meta, uid, start, end).await?
    };

    let mut response = Response::builder()
        .status(if range_header.is_some() {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        })
        .header(header::CONTENT_TYPE, meta.content_type.as_str())
        .header(header::CONTENT_LENGTH, (end - start + 1).max(0))
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", query.name),
        );
    if range_header.is_some() {
        response = response.header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{size}"),
        );
    }
    response.body(body).map_err(|_| ApiError::Internal)
}

async fn whole_object_body(
    state: &Arc<AppState>,
    meta: &MetaRecord,
    start: i64,
    end: i64,
) -> Result<Body, ApiError> {
    let data = state
        .store
        .get_object(&meta.bucket, &meta.storage_name, start, end - start + 1)
        .await?;
    Ok(Body::from(data))
}

/// Stream the covering chunks, sliced by intra-part offset, in order.
async fn reassembled_body(
    state: &Arc<AppState>,
    meta: &MetaRecord,
    uid: i64,
    start: i64,
    end: i64,
) -> Result<Body, ApiError> {
    let parts = match state.cache.get_parts(uid).await? {
        Some(parts) if !parts.is_empty() => parts,
        _ => state.meta.parts_by_uid(uid)?,
    };
    if parts.is_empty() {
        return Err(ApiError::NotFound("no chunks recorded for upload".into()));
    }

    // Plan (object, offset, length) reads by cumulative offsets.
    let mut plan = Vec::new();
    let mut cursor: i64 = 0;
    for part in &parts {
        let part_start = cursor;
        let part_end = cursor + part.storage_size - 1;
        cursor = part_end + 1;
        if part_end < start || part_start > end {
            continue;
        }
        let intra_start = (start - part_start).max(0);
        let intra_end = (end.min(part_end)) - part_start;
        plan.push((
            part.storage_name.clone(),
            intra_start,
            intra_end - intra_start + 1,
        ));
    }

    let store: Arc<dyn ObjectStore> = state.store.clone();
    let bucket = meta.bucket.clone();
    let stream = futures::stream::iter(plan).then(move |(object, offset, length)| {
        let store = store.clone();
        let bucket = bucket.clone();
        async move {
            store
                .get_object(&bucket, &object, offset, length)
                .await
                .map(Bytes::from)
        }
    });
    Ok(Body::from_stream(stream))
}

/// Parse a `Range` header against the object size. `None` header means
/// the whole object; an open or oversized end clamps to `size - 1`.
fn parse_range(header: Option<&str>, size: i64) -> Option<(i64, i64)> {
    let Some(header) = header else {
        return Some((0, size - 1));
    };
    let spec = header.strip_prefix("bytes=")?;
    let (start_str, end_str) = spec.split_once('-')?;
    let start: i64 = start_str.parse().ok()?;
    if start < 0 || start >= size {
        return None;
    }
    let end = if end_str.is_empty() {
        size - 1
    } else {
        end_str.parse::<i64>().ok()?.min(size - 1)
    };
    if end < start {
        return None;
    }
    Some((start, end))
}
