//! Peer forwarder: `Locate(uid)` fan-out over the service registry and
//! streaming reverse-proxy of chunk/merge requests to the owning node.

use crate::coord::{ServiceRecord, ServiceRegistry};
use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Concurrent locate probes per request.
const LOCATE_FANOUT: usize = 16;

/// Whole-request ceiling; uploads can be large.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer discovery failed: {0}")]
    Discovery(#[from] crate::coord::CoordError),

    #[error("no node owns the scratch directory")]
    NoOwner,

    #[error("forward failed: {0}")]
    Forward(String),
}

/// Minimal envelope view for locate replies.
#[derive(Deserialize)]
struct LocateReply {
    code: i64,
    data: Option<String>,
}

#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    registry: ServiceRegistry,
    scheme: String,
    port: u16,
}

impl PeerClient {
    pub fn new(registry: ServiceRegistry, port: u16) -> Self {
        Self {
            http: build_http_client(),
            registry,
            scheme: "http".to_string(),
            port,
        }
    }

    pub fn http(&self) -> reqwest::Client {
        self.http.clone()
    }

    /// Ask one peer whether it owns `uid`; returns the peer's outbound IP
    /// if its scratch directory exists.
    async fn locate(&self, peer: &ServiceRecord, uid: i64) -> Option<String> {
        let url = format!(
            "{}://{}:{}/api/storage/v0/proxy?uid={}",
            self.scheme, peer.ip, peer.port, uid
        );
        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("locate probe to {} failed: {}", peer.ip, e);
                return None;
            }
        };
        match response.json::<LocateReply>().await {
            Ok(reply) if reply.code == 200 => reply.data,
            Ok(_) => None,
            Err(e) => {
                debug!("locate reply from {} unreadable: {}", peer.ip, e);
                None
            }
        }
    }

    /// Fan out locate probes to every live peer and take the first
    /// responder. Multiple owners should not happen; when they do the
    /// choice is nondeterministic.
    pub async fn locate_owner(&self, uid: i64) -> Result<String, PeerError> {
        let peers = self.registry.discover().await?;
        if peers.is_empty() {
            return Err(PeerError::NoOwner);
        }

        let mut probes = FuturesUnordered::new();
        let mut pending = peers.iter();
        for peer in pending.by_ref().take(LOCATE_FANOUT) {
            probes.push(self.locate(peer, uid));
        }
        while let Some(result) = probes.next().await {
            if let Some(ip) = result {
                return Ok(ip);
            }
            if let Some(peer) = pending.next() {
                probes.push(self.locate(peer, uid));
            }
        }
        Err(PeerError::NoOwner)
    }

    /// Targeted delete verb: drop the owner's scratch directory for `uid`.
    pub async fn delete_scratch(&self, owner_ip: &str, uid: i64) -> Result<(), PeerError> {
        let url = format!(
            "{}://{}:{}/api/storage/v0/upload?uid={}",
            self.scheme, owner_ip, self.port, uid
        );
        self.http
            .delete(&url)
            .send()
            .await
            .map_err(|e| PeerError::Forward(e.to_string()))?;
        Ok(())
    }

    /// Reverse-proxy `req` to the owner node, preserving method, query,
    /// body, content type and length, and relay the response verbatim.
    pub async fn forward(&self, owner_ip: &str, req: Request) -> Result<Response, PeerError> {
        let (parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());
        let url = format!(
            "{}://{}:{}{}",
            self.scheme, owner_ip, self.port, path_and_query
        );
        debug!("forwarding {} {} to {}", parts.method, path_and_query, owner_ip);

        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
            .map_err(|e| PeerError::Forward(e.to_string()))?;
        let mut builder = self
            .http
            .request(method, &url)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()));
        for header in ["content-type", "content-length"] {
            if let Some(value) = parts.headers.get(header) {
                builder = builder.header(header, value.clone());
            }
        }

        let upstream = builder
            .send()
            .await
            .map_err(|e| PeerError::Forward(e.to_string()))?;

        let status = upstream.status();
        let mut response = Response::builder().status(status.as_u16());
        for header in ["content-type", "content-length", "content-range"] {
            if let Some(value) = upstream.headers().get(header) {
                response = response.header(header, value.clone());
            }
        }
        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| PeerError::Forward(e.to_string()))
    }
}

/// Transport matching the forwarding contract: generous request ceiling,
/// bounded dial time, no idle-connection reuse so behavior is identical
/// across peers.
pub fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(0)
        .build()
        .unwrap_or_default()
}
