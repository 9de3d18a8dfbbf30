//! Object-store backend trait definitions

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during object-store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Storage error: {0}")]
    Other(String),
}

/// Uniform interface over a local-FS backend and an S3-like backend.
///
/// Object-safe so it can be shared as `Arc<dyn ObjectStore>`. All methods
/// are safe for concurrent use.
///
/// Layout contract: one flat namespace per bucket; objects are either
/// `{uid}.{ext}` (whole uploads) or `{uid}_{n}` (chunks awaiting merge).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create a bucket if it does not already exist.
    async fn make_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    /// Upload a local file as `bucket/object`.
    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        local_path: &std::path::Path,
        content_type: &str,
    ) -> Result<(), StoreError>;

    /// Read `length` bytes starting at `offset`; `length = -1` reads to
    /// the end of the object.
    async fn get_object(
        &self,
        bucket: &str,
        object: &str,
        offset: i64,
        length: i64,
    ) -> Result<Vec<u8>, StoreError>;

    /// Object size, or `None` if it does not exist.
    async fn stat_object(&self, bucket: &str, object: &str) -> Result<Option<u64>, StoreError>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete_object(&self, bucket: &str, object: &str) -> Result<(), StoreError>;

    /// Names of all objects in `bucket` starting with `prefix`.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Server-side assemble of `parts` (in order) into `bucket/target`.
    async fn compose(
        &self,
        bucket: &str,
        target: &str,
        parts: &[String],
        content_type: &str,
    ) -> Result<(), StoreError>;
}
