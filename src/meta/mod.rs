//! Metadata model and repository.
//!
//! Three tables: `meta` (one row per logical upload), `part` (one row per
//! accepted chunk), `task` (asynchronous merge/delete work items).

pub mod repo;

pub use repo::{MetaError, MetaRepo};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Link issued, content pending.
pub const STATUS_PENDING: i64 = -1;
/// Content complete and stored.
pub const STATUS_COMPLETE: i64 = 1;

/// Task states
pub const TASK_UNDO: i64 = 0;
pub const TASK_RUNNING: i64 = 1;
pub const TASK_FINISH: i64 = 2;
pub const TASK_ERROR: i64 = 99;

/// One logical upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaRecord {
    pub uid: i64,
    pub bucket: String,
    pub name: String,
    pub storage_name: String,
    pub address: String,
    pub md5: String,
    pub height: i64,
    pub width: i64,
    pub storage_size: i64,
    pub multi_part: bool,
    pub part_num: i64,
    pub status: i64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One accepted chunk of a multipart upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartRecord {
    pub storage_uid: i64,
    pub chunk_num: i64,
    pub bucket: String,
    pub storage_name: String,
    pub storage_size: i64,
    pub part_md5: String,
    pub status: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Asynchronous work item drained by the task engine.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: i64,
    pub task_type: String,
    pub status: i64,
    pub extra_data: String,
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Task kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    PartMerge,
    PartDelete,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::PartMerge => "part-merge",
            TaskKind::PartDelete => "part-delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "part-merge" => Some(TaskKind::PartMerge),
            "part-delete" => Some(TaskKind::PartDelete),
            _ => None,
        }
    }
}

/// Opaque task payload identifying the target upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    pub storage_uid: i64,
    pub chunk_sum: i64,
}

/// Lowercased file extension, without the dot. Empty when there is none.
pub fn extension_of(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_lowercase(),
        _ => String::new(),
    }
}

/// Fixed suffix -> bucket map. Unknown-but-present suffixes land in
/// `unknown`; the empty suffix is rejected upstream at link generation.
pub fn bucket_for_extension(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" | "png" | "gif" | "bmp" => "image",
        "mp4" | "avi" | "wmv" | "mpeg" => "video",
        "mp3" | "wav" | "flac" => "audio",
        "pdf" | "doc" | "docx" | "ppt" | "pptx" | "xls" | "xlsx" => "doc",
        "zip" | "rar" | "tar" | "gz" | "7z" => "archive",
        _ => "unknown",
    }
}

/// Object name for a chunk: `{uid}_{chunk_num}`.
pub fn chunk_object_name(uid: i64, chunk_num: i64) -> String {
    format!("{uid}_{chunk_num}")
}
