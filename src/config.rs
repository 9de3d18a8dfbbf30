//! Configuration for the blobgate proxy node

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Root directory for per-upload scratch directories
    #[serde(default = "default_scratch_root")]
    pub scratch_root: PathBuf,

    /// HMAC key for signed upload/download URLs
    #[serde(default = "default_secret_key")]
    pub secret_key: String,

    /// Path to the sqlite metadata database (":memory:" for ephemeral)
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Coordination store (service registry, locks, hot cache)
    #[serde(default)]
    pub coordination: CoordinationConfig,

    /// Object-store backend configuration
    #[serde(default)]
    pub backend: BackendConfig,

    /// Task engine tuning
    #[serde(default)]
    pub task: TaskConfig,

    /// Maximum accepted request body in bytes (whole file or one chunk)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Seconds between registry heartbeats
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Liveness window: registry entries older than this are evicted
    #[serde(default = "default_service_ttl_secs")]
    pub service_ttl_secs: u64,
}

/// Coordination store backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CoordinationConfig {
    /// Redis-backed coordination (multi-node deployments)
    Redis {
        /// Connection URL, e.g. "redis://127.0.0.1:6379/0"
        url: String,
    },

    /// In-process coordination (single node, tests)
    Memory,
}

/// Object-store backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Filesystem backend for local storage/development
    Filesystem {
        /// Directory for bucket storage
        path: PathBuf,
    },

    /// S3-compatible backend for production use
    S3 {
        /// Endpoint URL (for MinIO, LocalStack, or custom S3-compatible services)
        #[serde(default)]
        endpoint: Option<String>,

        /// Region
        #[serde(default = "default_region")]
        region: String,

        /// Use path-style URLs (required for MinIO, LocalStack)
        #[serde(default = "default_force_path_style")]
        force_path_style: bool,

        /// Access key ID (optional, can use env/instance credentials)
        #[serde(default)]
        access_key_id: Option<String>,

        /// Secret access key (optional, can use env/instance credentials)
        #[serde(default)]
        secret_access_key: Option<String>,
    },
}

/// Task engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Worker pool size
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bounded queue depth between dispatcher and workers
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Retries before a task is parked in the error state
    #[serde(default = "default_compensation_total")]
    pub compensation_total: i64,

    /// Dispatcher poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

// Default value functions for serde
fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:8888".parse().unwrap()
}

fn default_scratch_root() -> PathBuf {
    PathBuf::from("./scratch")
}

fn default_secret_key() -> String {
    "blobgate-dev-key".to_string()
}

fn default_database_path() -> String {
    "./blobgate.db".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_force_path_style() -> bool {
    true
}

fn default_workers() -> usize {
    100
}

fn default_queue_depth() -> usize {
    200
}

fn default_compensation_total() -> i64 {
    5
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_body_size() -> usize {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_heartbeat_secs() -> u64 {
    180
}

fn default_service_ttl_secs() -> u64 {
    300
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        CoordinationConfig::Memory
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Filesystem {
            path: PathBuf::from("./data"),
        }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
            compensation_total: default_compensation_total(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            scratch_root: default_scratch_root(),
            secret_key: default_secret_key(),
            database_path: default_database_path(),
            coordination: CoordinationConfig::default(),
            backend: BackendConfig::default(),
            task: TaskConfig::default(),
            max_body_size: default_max_body_size(),
            heartbeat_secs: default_heartbeat_secs(),
            service_ttl_secs: default_service_ttl_secs(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from `BLOBGATE_CONFIG` if set, otherwise defaults.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("BLOBGATE_CONFIG") {
            match Self::from_file(&path) {
                Ok(config) => return config,
                Err(e) => {
                    eprintln!("Failed to load config from {path}: {e}, using defaults");
                }
            }
        }
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.task.workers, 100);
        assert_eq!(config.task.queue_depth, 200);
        assert_eq!(config.task.compensation_total, 5);
        assert_eq!(config.service_ttl_secs, 300);
        assert!(matches!(config.coordination, CoordinationConfig::Memory));
    }

    #[test]
    fn parse_toml_with_s3_backend() {
        let toml = r#"
            listen_addr = "127.0.0.1:9999"
            secret_key = "k"

            [backend]
            type = "s3"
            endpoint = "http://localhost:9000"
            region = "us-west-2"

            [coordination]
            type = "redis"
            url = "redis://localhost:6379/0"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.listen_addr.port(), 9999);
        match config.backend {
            BackendConfig::S3 { region, force_path_style, .. } => {
                assert_eq!(region, "us-west-2");
                assert!(force_path_style);
            }
            _ => panic!("expected s3 backend"),
        }
        assert!(matches!(config.coordination, CoordinationConfig::Redis { .. }));
    }
}
