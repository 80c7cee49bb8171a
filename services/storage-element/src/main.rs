//! storage-element process entrypoint: load config, run crash recovery,
//! bind the HTTP API, and serve until a shutdown signal arrives.

mod cache_db;
mod config;
mod download;
mod error;
mod health;
mod http;
mod mode;
mod naming;
mod reconciliation;
mod recovery;
mod state;
mod upload;

use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::RwLock;
use tracing::info;

use config::StorageElementConfig;
use mode::{ModeHistory, StorageMode};
use state::AppState;

/// Command-line flags, overlaid onto the YAML + env-var config layers.
#[derive(Debug, Parser)]
#[command(name = "storage-element")]
struct Args {
    /// Path to the service's YAML config file.
    #[arg(long, default_value = "config/storage-element.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    artstore_common::logging::init("storage-element", "info");

    let config: StorageElementConfig = artstore_common::config::load(&args.config, "STORAGE_ELEMENT")?;
    info!(element_id = %config.element_id, base_path = %config.base_path, "starting storage-element");

    tokio::fs::create_dir_all(&config.base_path).await?;

    let wal: Arc<dyn artstore_wal::Wal> = Arc::new(artstore_wal::SqliteWal::open(config.wal_db_path()).await?);
    let cache_db = Arc::new(cache_db::CacheDb::open(config.cache_db_path()).await?);

    let recovery_report = recovery::recover(wal.as_ref(), &config).await?;
    info!(?recovery_report, "crash recovery pass complete");

    let jwt = artstore_jwt::KeyManager::load(None, &config.jwt_public_key)?;
    jwt.start_watching()?;

    let redis_client = redis::Client::open(config.redis_url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;

    let initial_mode = StorageMode::parse(&config.initial_mode).unwrap_or(StorageMode::Rw);

    let app = AppState {
        config: config.clone(),
        wal,
        cache_db,
        jwt,
        mode: RwLock::new(initial_mode),
        mode_history: RwLock::new(ModeHistory::default()),
        used_bytes: AtomicU64::new(0),
        file_count: AtomicU64::new(0),
    };

    let shared = Arc::new(http::SharedState {
        app,
        reconciliation: reconciliation::ReconciliationLock::default(),
    });

    let health_state = Arc::clone(&shared);
    let health_redis = redis_conn.clone();
    let health_task = tokio::spawn(async move {
        health::run(&health_state.app, health_redis, artstore_common::shutdown::signal()).await;
    });

    let bind_addr = shared.app.config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "storage-element listening");

    let router = http::router(Arc::clone(&shared));
    axum::serve(listener, router).with_graceful_shutdown(artstore_common::shutdown::signal()).await?;

    health_task.await.ok();
    info!("storage-element shut down cleanly");
    Ok(())
}
