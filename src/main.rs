//! blobgate - object-storage proxy node

use blobgate::api::{router, AppState};
use blobgate::config::{BackendConfig, Config, CoordinationConfig};
use blobgate::coord::{HotCache, ServiceRegistry};
use blobgate::meta::MetaRepo;
use blobgate::peer::PeerClient;
use blobgate::scratch::Scratch;
use blobgate::signer::UrlSigner;
use blobgate::snowflake::{bootstrap_worker_id, IdGenerator};
use blobgate::task::{TaskDeps, TaskEngine};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Buckets pre-created at boot; uploads are routed into them by suffix.
const BUCKETS: [&str; 6] = ["image", "video", "audio", "doc", "archive", "unknown"];

/// Version string including build timestamp for --version output
fn version_long() -> &'static str {
    static V: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    V.get_or_init(|| {
        format!(
            "{} (built {})",
            env!("CARGO_PKG_VERSION"),
            env!("BLOBGATE_BUILD_TIME"),
        )
    })
}

/// blobgate, an object-storage proxy with deduplicated, resumable uploads
#[derive(Parser, Debug)]
#[command(name = "blobgate")]
#[command(version = version_long())]
#[command(author, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Priority: RUST_LOG > --verbose > default
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("blobgate=trace,tower_http=trace")
        } else {
            EnvFilter::new("blobgate=debug,tower_http=debug")
        }
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load()
    };
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }

    info!(
        "Starting blobgate v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BLOBGATE_BUILD_TIME"),
    );
    info!("  Listen address: {}", config.listen_addr);
    info!("  Scratch root: {:?}", config.scratch_root);
    match &config.backend {
        BackendConfig::Filesystem { path } => {
            info!("  Backend: Filesystem ({:?})", path);
        }
        BackendConfig::S3 { endpoint, region, .. } => {
            info!("  Backend: S3 (region {})", region);
            if let Some(ep) = endpoint {
                info!("  Endpoint: {}", ep);
            }
        }
    }
    match &config.coordination {
        CoordinationConfig::Redis { url } => info!("  Coordination: redis ({})", url),
        CoordinationConfig::Memory => {
            warn!("  Coordination: in-memory (single node only)")
        }
    }

    // Boot order matters: everything below is an unrecoverable failure
    // and aborts the process via `?`.
    let store = blobgate::storage::from_config(&config.backend).await?;
    for bucket in BUCKETS {
        store.make_bucket(bucket).await?;
    }

    let meta = Arc::new(MetaRepo::new(&config.database_path)?);
    let coord = blobgate::coord::from_config(&config.coordination).await?;

    let node_ip = local_ip_address::local_ip()?.to_string();
    let port = config.listen_addr.port();
    info!("  Node IP: {}", node_ip);

    let worker_id = bootstrap_worker_id(coord.as_ref(), &node_ip).await?;
    let ids = Arc::new(IdGenerator::new(worker_id, 0)?);
    info!("  Worker ID: {}", worker_id);

    let scratch = Scratch::new(config.scratch_root.clone());
    tokio::fs::create_dir_all(&config.scratch_root).await?;

    let registry = ServiceRegistry::new(
        coord.clone(),
        Duration::from_secs(config.service_ttl_secs),
    );
    let peers = PeerClient::new(registry.clone(), port);
    registry.register(&node_ip, port).await?;

    let state = Arc::new(AppState {
        store: store.clone(),
        meta: meta.clone(),
        coord: coord.clone(),
        cache: HotCache::new(coord.clone()),
        registry: registry.clone(),
        peers: peers.clone(),
        ids,
        signer: UrlSigner::new(&config.secret_key),
        scratch: scratch.clone(),
        node_ip: node_ip.clone(),
        config: config.clone(),
    });

    let shutdown = CancellationToken::new();

    // Heartbeat keeps this node discoverable while the HTTP surface is up.
    tokio::spawn({
        let registry = registry.clone();
        let http = peers.http();
        let shutdown = shutdown.clone();
        let heartbeat = Duration::from_secs(config.heartbeat_secs);
        async move {
            registry
                .run_heartbeat(http, node_ip, port, heartbeat, shutdown)
                .await;
        }
    });

    // Task engine drains part-merge / part-delete rows.
    let engine = TaskEngine::new(
        TaskDeps {
            meta,
            store,
            scratch,
            peers,
        },
        config.task.clone(),
    );
    let engine_handle = engine.spawn(shutdown.clone());

    let app = router(state);
    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("blobgate listening on http://{}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                shutdown_signal().await;
                shutdown.cancel();
            }
        })
        .await?;

    // Give in-flight tasks a bounded window to drain.
    if tokio::time::timeout(Duration::from_secs(5), engine_handle)
        .await
        .is_err()
    {
        warn!("task engine did not drain within the grace period");
    }
    info!("Server shutdown complete");
    Ok(())
}

/// Handle shutdown signals (SIGINT, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
