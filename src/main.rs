//! BleepStore - S3-compatible object storage server

use bleepstore::auth::AuthCache;
use bleepstore::config::Config;
use bleepstore::metadata::sqlite::SqliteMetadataStore;
use bleepstore::metadata::MetadataStore;
use bleepstore::metrics::Metrics;
use bleepstore::storage::FilesystemBackend;
use bleepstore::types::Credential;
use bleepstore::AppState;
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Version string including build timestamp for --version output
fn version_long() -> &'static str {
    // e.g. "0.4.2 (built 2026-07-30T09:12:44Z)"
    static V: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    V.get_or_init(|| {
        format!(
            "{} (built {})",
            env!("CARGO_PKG_VERSION"),
            env!("BLEEP_BUILD_TIME"),
        )
    })
}

/// BleepStore: S3-compatible object storage server
#[derive(Parser, Debug)]
#[command(name = "bleepstore")]
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

    // Priority: RUST_LOG > BLEEPSTORE_LOG_LEVEL > --verbose > default
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| std::env::var("BLEEPSTORE_LOG_LEVEL").map(EnvFilter::new))
        .unwrap_or_else(|_| {
            if cli.verbose {
                EnvFilter::new("bleepstore=trace,tower_http=trace")
            } else {
                EnvFilter::new("bleepstore=info,tower_http=warn")
            }
        });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load()
    };
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }

    info!(
        "Starting BleepStore v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BLEEP_BUILD_TIME"),
    );
    info!("  Listen address: {}", config.listen_addr);
    info!("  Region: {}", config.region);
    info!("  Data directory: {:?}", config.data_dir);
    info!("  Metadata database: {:?}", config.metadata_path);
    info!(
        "  Max object size: {} MB",
        config.max_object_size / 1024 / 1024
    );
    info!("  Access key: {}", config.owner.access_key_id);
    if config.owner.secret_access_key == "bleepstore-secret" {
        warn!("  Using the default secret access key; set BLEEPSTORE_SECRET_ACCESS_KEY in production");
    }

    // Initialise in dependency order: metadata store, storage backend,
    // caches, then the router.
    let metadata_path = config
        .metadata_path
        .to_str()
        .ok_or("metadata path is not valid UTF-8")?
        .to_string();
    let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::open(&metadata_path)?);

    let storage = Arc::new(
        FilesystemBackend::new(config.data_dir.clone(), config.max_object_size).await?,
    );

    // Seed the configured owner credential so signed requests verify from
    // the first call.
    metadata
        .put_credential(Credential {
            access_key_id: config.owner.access_key_id.clone(),
            secret_key: config.owner.secret_access_key.clone(),
            owner_id: config.owner.access_key_id.clone(),
            display_name: config.owner.display_name.clone(),
            active: true,
            created_at: Utc::now(),
        })
        .await?;

    let listen_addr = config.listen_addr;
    let state = Arc::new(AppState {
        config,
        metadata,
        storage,
        auth_cache: AuthCache::new(),
        metrics: Arc::new(Metrics::new()),
    });

    let app = bleepstore::server::app(state);

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("BleepStore listening on http://{listen_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

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
