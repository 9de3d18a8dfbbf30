//! Filesystem object-store backend. Buckets are directories under the
//! root; objects are plain files.

use super::traits::{ObjectStore, StoreError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::debug;

pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Create a new filesystem backend with the given root directory
    pub async fn new(root: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn object_path(&self, bucket: &str, object: &str) -> PathBuf {
        self.bucket_dir(bucket).join(object)
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn make_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        fs::create_dir_all(self.bucket_dir(bucket)).await?;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        local_path: &Path,
        _content_type: &str,
    ) -> Result<(), StoreError> {
        self.make_bucket(bucket).await?;
        let dest = self.object_path(bucket, object);
        fs::copy(local_path, &dest).await?;
        debug!("FS PUT {}/{}", bucket, object);
        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &str,
        object: &str,
        offset: i64,
        length: i64,
    ) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(bucket, object);
        let mut file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(format!("{bucket}/{object}"))
            } else {
                StoreError::Io(e)
            }
        })?;
        file.seek(SeekFrom::Start(offset as u64)).await?;

        let mut buf = Vec::new();
        if length < 0 {
            file.read_to_end(&mut buf).await?;
        } else {
            buf.resize(length as usize, 0);
            let mut read = 0;
            while read < buf.len() {
                let n = file.read(&mut buf[read..]).await?;
                if n == 0 {
                    break;
                }
                read += n;
            }
            buf.truncate(read);
        }
        Ok(buf)
    }

    async fn stat_object(&self, bucket: &str, object: &str) -> Result<Option<u64>, StoreError> {
        match fs::metadata(self.object_path(bucket, object)).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn delete_object(&self, bucket: &str, object: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.object_path(bucket, object)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.bucket_dir(bucket);
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(StoreError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn compose(
        &self,
        bucket: &str,
        target: &str,
        parts: &[String],
        _content_type: &str,
    ) -> Result<(), StoreError> {
        self.make_bucket(bucket).await?;
        // Assemble into a sibling temp file, then rename into place so a
        // crashed compose never leaves a truncated target.
        let dest = self.object_path(bucket, target);
        let tmp = self.object_path(bucket, &format!(".{target}.compose"));
        let mut out = fs::File::create(&tmp).await?;
        for part in parts {
            let path = self.object_path(bucket, part);
            let mut src = fs::File::open(&path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StoreError::NotFound(format!("{bucket}/{part}"))
                } else {
                    StoreError::Io(e)
                }
            })?;
            tokio::io::copy(&mut src, &mut out).await?;
        }
        out.flush().await?;
        out.sync_all().await?;
        drop(out);
        fs::rename(&tmp, &dest).await?;
        debug!("FS COMPOSE {}/{} from {} parts", bucket, target, parts.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store_with_object(data: &[u8]) -> (TempDir, FilesystemStore) {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemStore::new(tmp.path().join("data")).await.unwrap();
        let src = tmp.path().join("src");
        fs::write(&src, data).await.unwrap();
        store
            .put_object("image", "1.png", &src, "image/png")
            .await
            .unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn put_get_roundtrip() {
        let (_tmp, store) = store_with_object(b"0123456789").await;
        let all = store.get_object("image", "1.png", 0, -1).await.unwrap();
        assert_eq!(all, b"0123456789");
    }

    #[tokio::test]
    async fn ranged_get_honors_offset_and_length() {
        let (_tmp, store) = store_with_object(b"0123456789").await;
        let mid = store.get_object("image", "1.png", 2, 3).await.unwrap();
        assert_eq!(mid, b"234");

        // length past EOF is truncated, not padded
        let tail = store.get_object("image", "1.png", 8, 100).await.unwrap();
        assert_eq!(tail, b"89");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (_tmp, store) = store_with_object(b"x").await;
        assert!(matches!(
            store.get_object("image", "nope", 0, -1).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.stat_object("image", "nope").await.unwrap(), None);
        // deleting a missing object is a no-op
        store.delete_object("image", "nope").await.unwrap();
    }

    #[tokio::test]
    async fn stat_reports_size() {
        let (_tmp, store) = store_with_object(b"abcdef").await;
        assert_eq!(store.stat_object("image", "1.png").await.unwrap(), Some(6));
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemStore::new(tmp.path().join("data")).await.unwrap();
        for name in ["10_1", "10_2", "11_1"] {
            let src = tmp.path().join(name);
            fs::write(&src, b"p").await.unwrap();
            store
                .put_object("video", name, &src, "application/octet-stream")
                .await
                .unwrap();
        }
        let names = store.list_objects("video", "10_").await.unwrap();
        assert_eq!(names, vec!["10_1", "10_2"]);
        assert!(store.list_objects("empty", "x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn compose_concatenates_in_order() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemStore::new(tmp.path().join("data")).await.unwrap();
        for (name, data) in [("5_1", "aa"), ("5_2", "bb"), ("5_3", "cc")] {
            let src = tmp.path().join(name);
            fs::write(&src, data).await.unwrap();
            store
                .put_object("doc", name, &src, "application/octet-stream")
                .await
                .unwrap();
        }
        store
            .compose(
                "doc",
                "5.pdf",
                &["5_1".into(), "5_2".into(), "5_3".into()],
                "application/pdf",
            )
            .await
            .unwrap();
        let merged = store.get_object("doc", "5.pdf", 0, -1).await.unwrap();
        assert_eq!(merged, b"aabbcc");
    }
}
