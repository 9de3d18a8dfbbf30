//! Coordination client: one key-value backend shared by the service
//! registry, the distributed per-chunk lock, and the hot-metadata cache.

pub mod cache;
pub mod lock;
pub mod memory;
pub mod redis;
pub mod registry;

pub use cache::HotCache;
pub use lock::DistLock;
pub use memory::MemoryCoord;
pub use redis::RedisCoord;
pub use registry::{ServiceRecord, ServiceRegistry};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordError {
    #[error("coordination store error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Minimal command set the coordination facilities are built on.
///
/// Object-safe; shared as `Arc<dyn CoordBackend>`. Implementations must be
/// safe for concurrent use.
#[async_trait]
pub trait CoordBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CoordError>;

    /// Plain SET, optionally with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CoordError>;

    /// SET NX (PX ttl) semantics; true when the key was absent and is now
    /// held by the caller.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>)
        -> Result<bool, CoordError>;

    async fn del(&self, key: &str) -> Result<(), CoordError>;

    /// Atomic increment of an integer key; missing keys start at 0.
    async fn incr(&self, key: &str) -> Result<i64, CoordError>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), CoordError>;

    async fn hash_all(&self, key: &str) -> Result<HashMap<String, String>, CoordError>;

    async fn hash_del(&self, key: &str, field: &str) -> Result<(), CoordError>;

    /// Liveness probe for `/ping`.
    async fn ping(&self) -> Result<(), CoordError>;
}

/// Build the configured coordination backend.
pub async fn from_config(
    config: &crate::config::CoordinationConfig,
) -> Result<Arc<dyn CoordBackend>, CoordError> {
    match config {
        crate::config::CoordinationConfig::Redis { url } => {
            Ok(Arc::new(RedisCoord::connect(url).await?))
        }
        crate::config::CoordinationConfig::Memory => Ok(Arc::new(MemoryCoord::new())),
    }
}
