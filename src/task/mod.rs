//! Asynchronous task engine: a polling dispatcher feeds a bounded channel
//! drained by a fixed worker pool. Tasks are rows in the `task` table;
//! the dispatcher is the only writer of the undo -> running transition.

pub mod delete;
pub mod merge;

use crate::config::TaskConfig;
use crate::meta::{MetaRepo, TaskKind, TaskRecord};
use crate::peer::PeerClient;
use crate::scratch::Scratch;
use crate::storage::ObjectStore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("metadata error: {0}")]
    Meta(#[from] crate::meta::MetaError),

    #[error("object-store error: {0}")]
    Store(#[from] crate::storage::StoreError),

    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("scratch error: {0}")]
    Scratch(#[from] std::io::Error),

    #[error("unknown task type: {0}")]
    UnknownType(String),
}

/// Everything the executors touch.
pub struct TaskDeps {
    pub meta: Arc<MetaRepo>,
    pub store: Arc<dyn ObjectStore>,
    pub scratch: Scratch,
    pub peers: PeerClient,
}

impl TaskDeps {
    /// Drop the scratch directory for `uid` wherever it lives: locally
    /// when this node owns it, otherwise via a targeted delete verb to
    /// the owner. A missing owner means it is already gone.
    pub async fn remove_scratch(&self, uid: i64) -> Result<(), TaskError> {
        if self.scratch.exists(uid).await {
            self.scratch.remove(uid).await?;
            return Ok(());
        }
        if let Ok(owner) = self.peers.locate_owner(uid).await {
            if let Err(e) = self.peers.delete_scratch(&owner, uid).await {
                warn!("scratch delete on {} for uid {} failed: {}", owner, uid, e);
            }
        }
        Ok(())
    }
}

pub struct TaskEngine {
    deps: Arc<TaskDeps>,
    config: TaskConfig,
}

impl TaskEngine {
    pub fn new(deps: TaskDeps, config: TaskConfig) -> Self {
        Self {
            deps: Arc::new(deps),
            config,
        }
    }

    /// Start the dispatcher and worker pool. The returned handle resolves
    /// after a shutdown request once in-flight tasks have drained.
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, shutdown: CancellationToken) {
        let (tx, rx) = mpsc::channel::<TaskRecord>(self.config.queue_depth);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for _ in 0..self.config.workers.max(1) {
            let rx = rx.clone();
            let deps = self.deps.clone();
            let compensation_total = self.config.compensation_total;
            workers.spawn(async move {
                loop {
                    let task = { rx.lock().await.recv().await };
                    match task {
                        Some(task) => execute(&deps, task, compensation_total).await,
                        None => break,
                    }
                }
            });
        }

        info!(
            "task engine started ({} workers, queue {})",
            self.config.workers, self.config.queue_depth
        );
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        'dispatch: loop {
            if shutdown.is_cancelled() {
                break;
            }
            let claimed = match self.deps.meta.claim_undo_tasks(self.config.queue_depth.max(1)) {
                Ok(tasks) => tasks,
                Err(e) => {
                    error!("task poll failed: {}", e);
                    Vec::new()
                }
            };
            let idle = claimed.is_empty();
            for task in claimed {
                // send blocks on a full queue; backpressure stalls the poll
                if tx.send(task).await.is_err() {
                    break 'dispatch;
                }
            }
            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(poll) => {}
                    _ = shutdown.cancelled() => break,
                }
            }
        }

        // Close the channel; workers drain what is in flight and exit.
        drop(tx);
        while workers.join_next().await.is_some() {}
        info!("task engine stopped");
    }
}

async fn execute(deps: &Arc<TaskDeps>, task: TaskRecord, compensation_total: i64) {
    let outcome = match TaskKind::parse(&task.task_type) {
        Some(TaskKind::PartMerge) => merge::run(deps, &task).await,
        Some(TaskKind::PartDelete) => delete::run(deps, &task).await,
        None => Err(TaskError::UnknownType(task.task_type.clone())),
    };
    let update = match outcome {
        Ok(()) => deps.meta.finish_task(task.id),
        Err(e) => {
            error!(
                "task {} ({}) attempt failed: {}",
                task.id, task.task_type, e
            );
            deps.meta.fail_task(task.id, compensation_total)
        }
    };
    if let Err(e) = update {
        error!("task {} state update failed: {}", task.id, e);
    }
}
