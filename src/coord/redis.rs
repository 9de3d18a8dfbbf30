//! Redis coordination backend over a multiplexed connection manager.

use super::{CoordBackend, CoordError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;

pub struct RedisCoord {
    manager: ConnectionManager,
}

impl RedisCoord {
    /// Connect to the store; fails fast so boot aborts on a bad URL.
    pub async fn connect(url: &str) -> Result<Self, CoordError> {
        let client = redis::Client::open(url).map_err(to_err)?;
        let manager = ConnectionManager::new(client).await.map_err(to_err)?;
        Ok(Self { manager })
    }
}

fn to_err(e: redis::RedisError) -> CoordError {
    CoordError::Backend(e.to_string())
}

#[async_trait]
impl CoordBackend for RedisCoord {
    async fn get(&self, key: &str) -> Result<Option<String>, CoordError> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(to_err)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CoordError> {
        let mut conn = self.manager.clone();
        match ttl {
            Some(ttl) => {
                let mut cmd = redis::cmd("SET");
                cmd.arg(key).arg(value).arg("PX").arg(ttl.as_millis() as u64);
                let _: () = cmd.query_async(&mut conn).await.map_err(to_err)?;
                Ok(())
            }
            None => {
                let _: () = conn.set(key, value).await.map_err(to_err)?;
                Ok(())
            }
        }
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CoordError> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await.map_err(to_err)?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<(), CoordError> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await.map_err(to_err)?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, CoordError> {
        let mut conn = self.manager.clone();
        conn.incr(key, 1).await.map_err(to_err)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), CoordError> {
        let mut conn = self.manager.clone();
        let _: () = conn.hset(key, field, value).await.map_err(to_err)?;
        Ok(())
    }

    async fn hash_all(&self, key: &str) -> Result<HashMap<String, String>, CoordError> {
        let mut conn = self.manager.clone();
        conn.hgetall(key).await.map_err(to_err)
    }

    async fn hash_del(&self, key: &str, field: &str) -> Result<(), CoordError> {
        let mut conn = self.manager.clone();
        let _: () = conn.hdel(key, field).await.map_err(to_err)?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CoordError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(to_err)?;
        Ok(())
    }
}
