//! Hot cache: best-effort copies of completed metadata, part lists, and
//! already-generated download links. Written with SET NX and a 5-minute
//! TTL; readers fall back to SQL on a miss.

use super::{CoordBackend, CoordError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// TTL on every cached serialization.
const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone)]
pub struct HotCache {
    coord: Arc<dyn CoordBackend>,
}

impl HotCache {
    pub fn new(coord: Arc<dyn CoordBackend>) -> Self {
        Self { coord }
    }

    fn meta_key(uid: i64) -> String {
        format!("{uid}-meta")
    }

    fn parts_key(uid: i64) -> String {
        format!("{uid}-multiPart")
    }

    fn download_key(uid: i64, expire: i64) -> String {
        format!("{uid}-{expire}")
    }

    async fn put<T: Serialize>(&self, key: &str, value: &T) {
        // Best-effort: a cache write failure only costs a later SQL read.
        match serde_json::to_string(value) {
            Ok(json) => {
                if let Err(e) = self.coord.set_nx(key, &json, Some(CACHE_TTL)).await {
                    warn!("cache write for {} failed: {}", key, e);
                }
            }
            Err(e) => warn!("cache serialization for {} failed: {}", key, e),
        }
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CoordError> {
        match self.coord.get(key).await? {
            Some(json) => Ok(serde_json::from_str(&json).ok()),
            None => Ok(None),
        }
    }

    pub async fn put_meta(&self, meta: &crate::meta::MetaRecord) {
        self.put(&Self::meta_key(meta.uid), meta).await;
    }

    pub async fn get_meta(&self, uid: i64) -> Result<Option<crate::meta::MetaRecord>, CoordError> {
        self.get(&Self::meta_key(uid)).await
    }

    pub async fn put_parts(&self, uid: i64, parts: &[crate::meta::PartRecord]) {
        self.put(&Self::parts_key(uid), &parts).await;
    }

    pub async fn get_parts(
        &self,
        uid: i64,
    ) -> Result<Option<Vec<crate::meta::PartRecord>>, CoordError> {
        self.get(&Self::parts_key(uid)).await
    }

    /// Cache a generated download link so repeated requests for the same
    /// `(uid, expire)` do not recompute signatures.
    pub async fn put_download_link<T: Serialize>(&self, uid: i64, expire: i64, link: &T) {
        self.put(&Self::download_key(uid, expire), link).await;
    }

    pub async fn get_download_link<T: DeserializeOwned>(
        &self,
        uid: i64,
        expire: i64,
    ) -> Result<Option<T>, CoordError> {
        self.get(&Self::download_key(uid, expire)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::MemoryCoord;
    use crate::meta::MetaRecord;
    use chrono::Utc;

    fn sample_meta(uid: i64) -> MetaRecord {
        MetaRecord {
            uid,
            bucket: "image".into(),
            name: "a.png".into(),
            storage_name: format!("{uid}.png"),
            address: format!("image/{uid}.png"),
            md5: "m".into(),
            height: 0,
            width: 0,
            storage_size: 10,
            multi_part: false,
            part_num: 0,
            status: 1,
            content_type: "image/png".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn meta_roundtrip_and_miss() {
        let cache = HotCache::new(Arc::new(MemoryCoord::new()));
        assert!(cache.get_meta(1).await.unwrap().is_none());

        cache.put_meta(&sample_meta(1)).await;
        let hit = cache.get_meta(1).await.unwrap().unwrap();
        assert_eq!(hit.uid, 1);
        assert_eq!(hit.storage_name, "1.png");
    }

    #[tokio::test]
    async fn set_nx_keeps_first_write() {
        let cache = HotCache::new(Arc::new(MemoryCoord::new()));
        cache.put_meta(&sample_meta(1)).await;

        let mut second = sample_meta(1);
        second.md5 = "different".into();
        cache.put_meta(&second).await;

        let hit = cache.get_meta(1).await.unwrap().unwrap();
        assert_eq!(hit.md5, "m");
    }
}
