//! Shared test infrastructure: an in-process node (filesystem backend,
//! in-memory sqlite and coordination) driven through the real router
//! with `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use blobgate::api::{router, AppState};
use blobgate::config::{BackendConfig, Config, CoordinationConfig, TaskConfig};
use blobgate::coord::{CoordBackend, HotCache, MemoryCoord, ServiceRegistry};
use blobgate::meta::MetaRepo;
use blobgate::peer::PeerClient;
use blobgate::scratch::Scratch;
use blobgate::signer::UrlSigner;
use blobgate::snowflake::IdGenerator;
use blobgate::storage::FilesystemStore;
use blobgate::task::TaskDeps;
use http_body_util::BodyExt;
use md5::{Digest, Md5};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

pub const TEST_KEY: &str = "test-signing-key";

pub struct TestNode {
    pub app: Router,
    pub state: Arc<AppState>,
    _tmp: TempDir,
}

impl TestNode {
    pub async fn start() -> Self {
        let tmp = TempDir::new().expect("temp dir");
        let config = Config {
            listen_addr: "127.0.0.1:8888".parse().unwrap(),
            scratch_root: tmp.path().join("scratch"),
            secret_key: TEST_KEY.to_string(),
            database_path: ":memory:".to_string(),
            coordination: CoordinationConfig::Memory,
            backend: BackendConfig::Filesystem {
                path: tmp.path().join("data"),
            },
            task: TaskConfig {
                workers: 2,
                queue_depth: 8,
                compensation_total: 3,
                poll_interval_ms: 10,
            },
            ..Config::default()
        };

        let store = Arc::new(
            FilesystemStore::new(tmp.path().join("data"))
                .await
                .expect("filesystem store"),
        );
        let meta = Arc::new(MetaRepo::new(":memory:").expect("sqlite"));
        let coord: Arc<dyn CoordBackend> = Arc::new(MemoryCoord::new());
        let registry = ServiceRegistry::new(coord.clone(), Duration::from_secs(300));
        let peers = PeerClient::new(registry.clone(), 8888);
        let scratch = Scratch::new(config.scratch_root.clone());
        tokio::fs::create_dir_all(&config.scratch_root)
            .await
            .expect("scratch root");

        let state = Arc::new(AppState {
            store,
            meta,
            coord: coord.clone(),
            cache: HotCache::new(coord),
            registry,
            peers,
            ids: Arc::new(IdGenerator::new(1, 1).expect("id generator")),
            signer: UrlSigner::new(TEST_KEY),
            scratch,
            node_ip: "127.0.0.1".to_string(),
            config,
        });

        Self {
            app: router(state.clone()),
            state,
            _tmp: tmp,
        }
    }

    /// Dependencies for driving the task engine against this node.
    pub fn task_deps(&self) -> TaskDeps {
        TaskDeps {
            meta: self.state.meta.clone(),
            store: self.state.store.clone(),
            scratch: self.state.scratch.clone(),
            peers: self.state.peers.clone(),
        }
    }

    pub async fn request(&self, req: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(req).await.expect("router call")
    }

    /// POST a JSON body; returns the parsed envelope.
    pub async fn post_json(&self, path: &str, body: Value) -> Value {
        let response = self
            .request(
                Request::post(path)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        read_json(response).await
    }

    /// GET a path; returns the parsed envelope.
    pub async fn get_json(&self, path: &str) -> Value {
        let response = self
            .request(Request::get(path).body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        read_json(response).await
    }

    /// PUT a multipart `file` field to a signed upload URL.
    pub async fn put_file(&self, url: &str, data: &[u8]) -> Value {
        let (content_type, body) = multipart_body(data);
        let response = self
            .request(
                Request::put(url)
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        read_json(response).await
    }

    /// PUT with an empty body (merge admission).
    pub async fn put_empty(&self, url: &str) -> Value {
        let response = self
            .request(Request::put(url).body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        read_json(response).await
    }

    /// Issue one upload link and return `(uid, single, multi, merge)`.
    pub async fn upload_link(&self, path: &str) -> (String, String, String, String) {
        let envelope = self
            .post_json(
                "/api/storage/v0/link/upload",
                serde_json::json!({"filePath": [path], "expire": 86400}),
            )
            .await;
        assert_eq!(envelope["code"], 200, "link/upload failed: {envelope}");
        let item = &envelope["data"][0];
        (
            item["uid"].as_str().unwrap().to_string(),
            item["url"]["single"].as_str().unwrap().to_string(),
            item["url"]["multi"]["upload"].as_str().unwrap().to_string(),
            item["url"]["multi"]["merge"].as_str().unwrap().to_string(),
        )
    }

    /// Issue a download link for `uid`.
    pub async fn download_link(&self, uid: &str, expire: i64) -> String {
        let envelope = self
            .post_json(
                "/api/storage/v0/link/download",
                serde_json::json!({"uid": [uid], "expire": expire}),
            )
            .await;
        assert_eq!(envelope["code"], 200, "link/download failed: {envelope}");
        envelope["data"][0]["url"].as_str().unwrap().to_string()
    }

    /// Download a URL, optionally with a Range header; returns the body.
    pub async fn download(&self, url: &str, range: Option<&str>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::get(url);
        if let Some(range) = range {
            builder = builder.header(header::RANGE, range);
        }
        let response = self.request(builder.body(Body::empty()).unwrap()).await;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("download body")
            .to_bytes()
            .to_vec();
        (status, bytes)
    }
}

pub async fn read_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("response body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json envelope")
}

/// Hand-built multipart/form-data body with one `file` field.
pub fn multipart_body(data: &[u8]) -> (String, Vec<u8>) {
    let boundary = "blobgate-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"file\"; filename=\"upload.bin\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (
        format!("multipart/form-data; boundary={boundary}"),
        body,
    )
}

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Deterministic pseudo-random payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Append or substitute the md5 query parameter on a signed URL.
pub fn with_md5(url: &str, md5: &str) -> String {
    format!("{url}&md5={md5}")
}
