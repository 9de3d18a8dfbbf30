//! In-process coordination backend for single-node runs and tests.
//!
//! Mirrors the redis semantics the facilities rely on: lazy expiry on
//! read, SET NX, atomic increment.

use super::{CoordBackend, CoordError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }
}

#[derive(Default)]
pub struct MemoryCoord {
    keys: Mutex<HashMap<String, Entry>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MemoryCoord {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(ttl: Option<Duration>, value: &str) -> Entry {
        Entry {
            value: value.to_string(),
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }
}

#[async_trait]
impl CoordBackend for MemoryCoord {
    async fn get(&self, key: &str) -> Result<Option<String>, CoordError> {
        let mut keys = self.keys.lock();
        match keys.get(key) {
            Some(entry) if entry.live() => Ok(Some(entry.value.clone())),
            Some(_) => {
                keys.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CoordError> {
        self.keys
            .lock()
            .insert(key.to_string(), Self::entry(ttl, value));
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CoordError> {
        let mut keys = self.keys.lock();
        if keys.get(key).is_some_and(Entry::live) {
            return Ok(false);
        }
        keys.insert(key.to_string(), Self::entry(ttl, value));
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<(), CoordError> {
        self.keys.lock().remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, CoordError> {
        let mut keys = self.keys.lock();
        let current = match keys.get(key) {
            Some(entry) if entry.live() => entry.value.parse::<i64>().unwrap_or(0),
            _ => 0,
        };
        let next = current + 1;
        keys.insert(key.to_string(), Self::entry(None, &next.to_string()));
        Ok(next)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), CoordError> {
        self.hashes
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_all(&self, key: &str) -> Result<HashMap<String, String>, CoordError> {
        Ok(self.hashes.lock().get(key).cloned().unwrap_or_default())
    }

    async fn hash_del(&self, key: &str, field: &str) -> Result<(), CoordError> {
        if let Some(hash) = self.hashes.lock().get_mut(key) {
            hash.remove(field);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), CoordError> {
        Ok(())
    }
}
