//! Per-upload scratch directories and local file helpers.
//!
//! Every in-flight upload owns `{root}/{uid}/` on exactly one node. The
//! directory is created at link generation (or on first forwarded byte),
//! holds the single-upload file or chunk files, and is removed on
//! completion or by the part-delete task.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;

/// Sniff window for content-type detection.
const SNIFF_LEN: usize = 512;

/// Scratch-directory manager rooted at the configured scratch path.
#[derive(Clone)]
pub struct Scratch {
    root: PathBuf,
}

impl Scratch {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Directory for one upload.
    pub fn dir(&self, uid: i64) -> PathBuf {
        self.root.join(uid.to_string())
    }

    /// Path of a file inside the upload's directory.
    pub fn file(&self, uid: i64, name: &str) -> PathBuf {
        self.dir(uid).join(name)
    }

    /// Chunk file path: `{uid}_{chunk_num}`.
    pub fn chunk_file(&self, uid: i64, chunk_num: i64) -> PathBuf {
        self.file(uid, &format!("{uid}_{chunk_num}"))
    }

    pub async fn create(&self, uid: i64) -> std::io::Result<()> {
        fs::create_dir_all(self.dir(uid)).await
    }

    /// Whether this node owns the upload's scratch directory.
    pub async fn exists(&self, uid: i64) -> bool {
        fs::try_exists(self.dir(uid)).await.unwrap_or(false)
    }

    /// Remove the upload's directory and everything in it.
    pub async fn remove(&self, uid: i64) -> std::io::Result<()> {
        match fs::remove_dir_all(self.dir(uid)).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Detect a file's content type from its leading bytes.
pub async fn detect_content_type(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut head = vec![0u8; SNIFF_LEN];
    let n = file.read(&mut head).await?;
    head.truncate(n);
    Ok(sniff(&head))
}

fn sniff(head: &[u8]) -> String {
    match infer::get(head) {
        Some(kind) => kind.mime_type().to_string(),
        None => "application/octet-stream".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn scratch_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let scratch = Scratch::new(tmp.path().to_path_buf());

        assert!(!scratch.exists(7).await);
        scratch.create(7).await.unwrap();
        assert!(scratch.exists(7).await);

        fs::write(scratch.chunk_file(7, 1), b"chunk").await.unwrap();
        scratch.remove(7).await.unwrap();
        assert!(!scratch.exists(7).await);

        // removing twice is fine
        scratch.remove(7).await.unwrap();
    }

    #[tokio::test]
    async fn sniffs_png_and_falls_back_to_octet_stream() {
        let tmp = TempDir::new().unwrap();
        let png = tmp.path().join("a.png");
        fs::write(&png, [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0])
            .await
            .unwrap();
        assert_eq!(detect_content_type(&png).await.unwrap(), "image/png");

        let txt = tmp.path().join("b.txt");
        fs::write(&txt, b"just text").await.unwrap();
        assert_eq!(
            detect_content_type(&txt).await.unwrap(),
            "application/octet-stream"
        );
    }
}
