//! Signed-link generation for uploads and downloads.

use crate::api::{ok, ApiError, AppState};
use crate::meta::{bucket_for_extension, extension_of, MetaRecord, STATUS_PENDING};
use crate::signer::now_date;
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, instrument};

/// Batch ceiling for `/link/upload` and `/resume`.
pub const LINK_LIMIT: usize = 50;
/// Batch ceiling for `/link/download`.
pub const DOWNLOAD_LINK_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct UploadLinkRequest {
    #[serde(rename = "filePath")]
    pub file_path: Vec<String>,
    #[serde(default = "default_expire")]
    pub expire: i64,
}

fn default_expire() -> i64 {
    86400
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MultiUrl {
    pub upload: String,
    pub merge: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadUrl {
    pub single: String,
    pub multi: MultiUrl,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadLinkItem {
    pub uid: String,
    pub url: UploadUrl,
    pub path: String,
}

/// `POST /link/upload`: allocate a uid, scratch directory, pending meta
/// row and signed URL family per unique path.
#[instrument(skip(state, request))]
pub async fn upload_link(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UploadLinkRequest>,
) -> Result<Response, ApiError> {
    if request.file_path.len() > LINK_LIMIT {
        return Err(ApiError::Param(format!(
            "at most {LINK_LIMIT} paths per request"
        )));
    }

    let paths = dedupe(&request.file_path);
    for path in &paths {
        if extension_of(basename(path)).is_empty() {
            return Err(ApiError::Param(format!(
                "file [{path}] needs a non-empty suffix"
            )));
        }
    }

    // Fan out one link generator per path; join and collect.
    let results = join_all(
        paths
            .iter()
            .map(|path| generate_one(&state, path, request.expire)),
    )
    .await;

    let mut items = Vec::with_capacity(results.len());
    let mut records = Vec::with_capacity(results.len());
    let mut failed = None;
    for result in results {
        match result {
            Ok((item, record)) => {
                items.push(item);
                records.push(record);
            }
            Err(e) => failed = Some(e),
        }
    }

    if let Some(e) = failed {
        cleanup_scratch(&state, &records).await;
        error!("link generation failed: {}", e);
        return Err(e);
    }

    // One batch; a failed batch leaves no scratch directories behind.
    if let Err(e) = state.meta.batch_insert_meta(&records) {
        cleanup_scratch(&state, &records).await;
        error!("link batch insert failed: {}", e);
        return Err(ApiError::Internal);
    }

    Ok(ok(items))
}

async fn generate_one(
    state: &Arc<AppState>,
    path: &str,
    expire: i64,
) -> Result<(UploadLinkItem, MetaRecord), ApiError> {
    let uid = state.ids.next_id()?;
    let name = basename(path).to_string();
    let ext = extension_of(&name);
    let bucket = bucket_for_extension(&ext).to_string();
    let storage_name = format!("{uid}.{ext}");
    let address = format!("{bucket}/{storage_name}");

    state
        .scratch
        .create(uid)
        .await
        .map_err(|e| ApiError::Store(format!("create scratch for {uid} failed: {e}")))?;

    let date = now_date();
    let query = state.signer.upload_query(&uid.to_string(), &date, expire);
    let item = UploadLinkItem {
        uid: uid.to_string(),
        url: UploadUrl {
            single: format!("/api/storage/v0/upload?{query}"),
            multi: MultiUrl {
                upload: format!("/api/storage/v0/upload/multi?{query}"),
                merge: format!("/api/storage/v0/upload/merge?{query}"),
            },
        },
        path: path.to_string(),
    };

    let now = Utc::now();
    let record = MetaRecord {
        uid,
        bucket,
        name,
        storage_name,
        address,
        md5: String::new(),
        height: 0,
        width: 0,
        storage_size: 0,
        multi_part: false,
        part_num: 0,
        status: STATUS_PENDING,
        content_type: "application/octet-stream".to_string(),
        created_at: now,
        updated_at: now,
    };
    Ok((item, record))
}

async fn cleanup_scratch(state: &Arc<AppState>, records: &[MetaRecord]) {
    for record in records {
        let _ = state.scratch.remove(record.uid).await;
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadLinkRequest {
    pub uid: Vec<String>,
    pub expire: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadMeta {
    #[serde(rename = "srcName")]
    pub src_name: String,
    #[serde(rename = "dstName")]
    pub dst_name: String,
    pub height: i64,
    pub width: i64,
    pub md5: String,
    pub size: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadLinkItem {
    pub uid: String,
    pub url: String,
    pub meta: DownloadMeta,
}

/// `POST /link/download`: signed download URL per uid, reusing cached
/// links for a repeated `(uid, expire)` pair.
#[instrument(skip(state, request))]
pub async fn download_link(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DownloadLinkRequest>,
) -> Result<Response, ApiError> {
    if request.uid.len() > DOWNLOAD_LINK_LIMIT {
        return Err(ApiError::Param(format!(
            "at most {DOWNLOAD_LINK_LIMIT} uids per request"
        )));
    }

    let mut items = Vec::new();
    let mut misses = Vec::new();
    for uid_str in dedupe(&request.uid) {
        let uid: i64 = uid_str
            .parse()
            .map_err(|_| ApiError::Param(format!("invalid uid: {uid_str}")))?;
        match state
            .cache
            .get_download_link::<DownloadLinkItem>(uid, request.expire)
            .await?
        {
            Some(link) => items.push(link),
            None => misses.push(uid),
        }
    }

    // uids with no metadata row are skipped rather than answered with
    // empty pointers.
    let metas = state.meta.meta_by_uids(&misses)?;
    let generated = join_all(
        metas
            .iter()
            .map(|meta| generate_download(&state, meta, request.expire)),
    )
    .await;
    items.extend(generated);

    Ok(ok(items))
}

async fn generate_download(
    state: &Arc<AppState>,
    meta: &MetaRecord,
    expire: i64,
) -> DownloadLinkItem {
    let date = now_date();
    let query = state.signer.download_query(
        meta.uid,
        &meta.name,
        &meta.bucket,
        &meta.storage_name,
        &date,
        expire,
    );
    let item = DownloadLinkItem {
        uid: meta.uid.to_string(),
        url: format!("/api/storage/v0/download?{query}"),
        meta: DownloadMeta {
            src_name: meta.name.clone(),
            dst_name: meta.storage_name.clone(),
            height: meta.height,
            width: meta.width,
            md5: meta.md5.clone(),
            size: meta.storage_size.to_string(),
        },
    };
    state
        .cache
        .put_download_link(meta.uid, expire, &item)
        .await;
    item
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn dedupe(values: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .iter()
        .filter(|v| seen.insert(v.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_preserves_first_occurrence_order() {
        let input = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        assert_eq!(dedupe(&input), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn basename_strips_directories() {
        assert_eq!(basename("/tmp/photos/a.png"), "a.png");
        assert_eq!(basename("a.png"), "a.png");
        assert_eq!(basename(r"c:\tmp\a.png"), "a.png");
    }
}
