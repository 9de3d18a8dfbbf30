//! Service registry: heartbeat and discovery over one hash key.
//!
//! Each node writes `ip -> ServiceRecord` under `service:proxy`. Discovery
//! reads the whole hash and treats records older than the liveness window
//! as dead, deleting them opportunistically.

use super::{CoordBackend, CoordError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Hash key all proxy nodes register under.
pub const SERVICE_REGISTRY_KEY: &str = "service:proxy";

/// Delay between self-check retries when the local HTTP surface is down.
const SELF_CHECK_RETRY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub ip: String,
    pub port: u16,
    /// Epoch seconds of the last heartbeat.
    pub created_at: i64,
}

#[derive(Clone)]
pub struct ServiceRegistry {
    coord: Arc<dyn CoordBackend>,
    /// Liveness window; entries older than this are evicted on read.
    ttl: Duration,
}

impl ServiceRegistry {
    pub fn new(coord: Arc<dyn CoordBackend>, ttl: Duration) -> Self {
        Self { coord, ttl }
    }

    /// Write this node's record.
    pub async fn register(&self, ip: &str, port: u16) -> Result<(), CoordError> {
        let record = ServiceRecord {
            ip: ip.to_string(),
            port,
            created_at: chrono::Utc::now().timestamp(),
        };
        self.coord
            .hash_set(SERVICE_REGISTRY_KEY, ip, &serde_json::to_string(&record)?)
            .await
    }

    /// All live peers, evicting records older than the liveness window.
    pub async fn discover(&self) -> Result<Vec<ServiceRecord>, CoordError> {
        let all = self.coord.hash_all(SERVICE_REGISTRY_KEY).await?;
        let boundary = chrono::Utc::now().timestamp() - self.ttl.as_secs() as i64;
        let mut live = Vec::new();
        for (field, value) in all {
            let record: ServiceRecord = match serde_json::from_str(&value) {
                Ok(r) => r,
                Err(e) => {
                    warn!("dropping unreadable registry entry {}: {}", field, e);
                    let _ = self.coord.hash_del(SERVICE_REGISTRY_KEY, &field).await;
                    continue;
                }
            };
            if record.created_at < boundary {
                let _ = self.coord.hash_del(SERVICE_REGISTRY_KEY, &field).await;
                continue;
            }
            live.push(record);
        }
        Ok(live)
    }

    /// Heartbeat loop: self-check the local HTTP health endpoint, then
    /// re-register. `tokio::time::interval` schedules beats from absolute
    /// deadlines, so the cadence does not drift with beat duration.
    pub async fn run_heartbeat(
        &self,
        http: reqwest::Client,
        ip: String,
        port: u16,
        interval: Duration,
        shutdown: CancellationToken,
    ) {
        let health_url = format!("http://127.0.0.1:{port}/api/storage/v0/health");
        let mut tick = tokio::time::interval(interval);
        info!("heartbeat loop started for {}:{}", ip, port);
        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.cancelled() => {
                    info!("heartbeat loop stopped");
                    return;
                }
            }

            // Only advertise a node whose own HTTP surface answers.
            while let Err(e) = http.get(&health_url).send().await {
                error!("health self-check failed: {}", e);
                tokio::select! {
                    _ = tokio::time::sleep(SELF_CHECK_RETRY) => {}
                    _ = shutdown.cancelled() => return,
                }
            }

            if let Err(e) = self.register(&ip, port).await {
                error!("heartbeat registration failed: {}", e);
            }
        }
    }
}
