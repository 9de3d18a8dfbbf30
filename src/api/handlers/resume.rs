//! Instant upload (whole-object dedupe) and the chunk checkpoint query.

use crate::api::handlers::link::LINK_LIMIT;
use crate::api::{ok, ApiError, AppState};
use crate::meta::{MetaRecord, STATUS_COMPLETE};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub data: Vec<Md5Path>,
}

#[derive(Debug, Deserialize)]
pub struct Md5Path {
    pub md5: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ResumeItem {
    pub md5: String,
    /// Empty when bytes are still required.
    pub uid: String,
}

/// `POST /resume`: for each MD5 with a completed non-multipart upload,
/// clone its storage pointers under a fresh uid so no bytes cross the
/// wire. Dedupe is whole-object, not per-chunk.
#[instrument(skip(state, request))]
pub async fn resume(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResumeRequest>,
) -> Result<Response, ApiError> {
    if request.data.len() > LINK_LIMIT {
        return Err(ApiError::Param(format!(
            "at most {LINK_LIMIT} entries per request"
        )));
    }

    // Collapse duplicate MD5s; the first path wins as the clone's name.
    let mut md5s = Vec::new();
    let mut md5_to_path = HashMap::new();
    for item in &request.data {
        if !md5_to_path.contains_key(&item.md5) {
            md5_to_path.insert(item.md5.clone(), item.path.clone());
            md5s.push(item.md5.clone());
        }
    }

    // Only completed, whole-object rows qualify as sources; one per MD5.
    let mut sources: HashMap<String, MetaRecord> = HashMap::new();
    for rec in state.meta.completed_by_md5(&md5s)? {
        sources.entry(rec.md5.clone()).or_insert(rec);
    }

    let mut clones = Vec::new();
    let mut items = Vec::with_capacity(md5s.len());
    for md5 in &md5s {
        let Some(source) = sources.get(md5) else {
            items.push(ResumeItem {
                md5: md5.clone(),
                uid: String::new(),
            });
            continue;
        };
        let uid = state.ids.next_id()?;
        let now = Utc::now();
        clones.push(MetaRecord {
            uid,
            bucket: source.bucket.clone(),
            name: basename(&md5_to_path[md5]).to_string(),
            storage_name: source.storage_name.clone(),
            address: source.address.clone(),
            md5: md5.clone(),
            height: source.height,
            width: source.width,
            storage_size: source.storage_size,
            multi_part: false,
            part_num: 0,
            status: STATUS_COMPLETE,
            content_type: source.content_type.clone(),
            created_at: now,
            updated_at: now,
        });
        items.push(ResumeItem {
            md5: md5.clone(),
            uid: uid.to_string(),
        });
    }

    if !clones.is_empty() {
        state.meta.batch_insert_meta(&clones)?;
        for clone in &clones {
            state.cache.put_meta(clone).await;
        }
    }

    Ok(ok(items))
}

#[derive(Debug, Deserialize)]
pub struct CheckpointQuery {
    pub uid: String,
}

/// `GET /checkpoint?uid=`: chunk numbers already accepted for the upload,
/// so a restarted client skips what it has.
pub async fn checkpoint(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CheckpointQuery>,
) -> Result<Response, ApiError> {
    let uid: i64 = query
        .uid
        .parse()
        .map_err(|_| ApiError::Param(format!("invalid uid: {}", query.uid)))?;

    let chunks: Vec<i64> = state
        .meta
        .parts_by_uid(uid)?
        .iter()
        .map(|p| p.chunk_num)
        .collect();
    Ok(ok(chunks))
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
