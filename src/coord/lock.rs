//! Advisory distributed lock with SET NX PX semantics.
//!
//! The TTL bounds how long a crashed holder can stall others; correctness
//! of chunk acceptance also relies on the idempotency check performed
//! under the lock.

use super::{CoordBackend, CoordError};
use std::sync::Arc;
use std::time::Duration;

/// TTL chosen to exceed worst-case chunk processing time.
const LOCK_TTL: Duration = Duration::from_secs(60);

pub struct DistLock {
    coord: Arc<dyn CoordBackend>,
    key: String,
}

impl DistLock {
    pub fn new(coord: Arc<dyn CoordBackend>, key: String) -> Self {
        Self { coord, key }
    }

    /// Per-chunk lock key for multipart uploads.
    pub fn chunk_key(uid: i64, chunk_num: i64, md5: &str) -> String {
        format!("multi-part-{uid}-{chunk_num}-{md5}")
    }

    /// True when the lock was free and is now held by the caller.
    pub async fn acquire(&self) -> Result<bool, CoordError> {
        self.coord.set_nx(&self.key, "1", Some(LOCK_TTL)).await
    }

    pub async fn release(&self) -> Result<(), CoordError> {
        self.coord.del(&self.key).await
    }
}
