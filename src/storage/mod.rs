//! Object-store adapter: trait plus filesystem and S3 backends.

pub mod filesystem;
pub mod s3;
pub mod traits;

pub use filesystem::FilesystemStore;
pub use s3::S3Store;
pub use traits::{ObjectStore, StoreError};

use crate::config::BackendConfig;
use std::sync::Arc;

/// Build the configured backend.
pub async fn from_config(config: &BackendConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
    match config {
        BackendConfig::Filesystem { path } => {
            Ok(Arc::new(FilesystemStore::new(path.clone()).await?))
        }
        BackendConfig::S3 { .. } => Ok(Arc::new(S3Store::new(config).await?)),
    }
}
