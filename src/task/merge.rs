//! part-merge: drive the object-store compose that turns accepted chunks
//! into the final blob, then clean up.
//!
//! Idempotent: every step checks "already in target state" first, so a
//! retried or replayed task converges instead of failing.

use super::{TaskDeps, TaskError};
use crate::meta::{TaskPayload, TaskRecord};
use tracing::{info, warn};

pub async fn run(deps: &TaskDeps, task: &TaskRecord) -> Result<(), TaskError> {
    let payload: TaskPayload = serde_json::from_str(&task.extra_data)?;
    let uid = payload.storage_uid;

    let Some(meta) = deps.meta.meta_by_uid(uid)? else {
        warn!("merge task {} references unknown uid {}", task.id, uid);
        return Ok(());
    };

    let parts = deps.meta.parts_by_uid(uid)?;
    if parts.is_empty() {
        // A previous attempt finished the cleanup.
        return Ok(());
    }

    // Compose unless the merged blob already landed.
    if deps
        .store
        .stat_object(&meta.bucket, &meta.storage_name)
        .await?
        .is_none()
    {
        let names: Vec<String> = parts.iter().map(|p| p.storage_name.clone()).collect();
        deps.store
            .compose(&meta.bucket, &meta.storage_name, &names, &meta.content_type)
            .await?;
    }

    for part in &parts {
        deps.store
            .delete_object(&part.bucket, &part.storage_name)
            .await?;
    }
    deps.remove_scratch(uid).await?;
    deps.meta.delete_parts(uid)?;

    info!(
        "merged uid {} into {}/{} from {} chunks",
        uid,
        meta.bucket,
        meta.storage_name,
        parts.len()
    );
    Ok(())
}
