//! part-delete: garbage-collect the chunks of an upload that will never
//! merge (chunk-count mismatch) plus its scratch directory.

use super::{TaskDeps, TaskError};
use crate::meta::{TaskPayload, TaskRecord};
use tracing::{info, warn};

pub async fn run(deps: &TaskDeps, task: &TaskRecord) -> Result<(), TaskError> {
    let payload: TaskPayload = serde_json::from_str(&task.extra_data)?;
    let uid = payload.storage_uid;

    let Some(meta) = deps.meta.meta_by_uid(uid)? else {
        warn!("delete task {} references unknown uid {}", task.id, uid);
        return Ok(());
    };

    // Enumerate by prefix rather than trusting part rows: orphaned chunk
    // objects are exactly what this task exists to collect.
    let names = deps
        .store
        .list_objects(&meta.bucket, &format!("{uid}_"))
        .await?;
    for name in &names {
        deps.store.delete_object(&meta.bucket, name).await?;
    }

    deps.meta.delete_parts(uid)?;
    deps.remove_scratch(uid).await?;

    info!("deleted {} chunk objects for uid {}", names.len(), uid);
    Ok(())
}
