//! admin-module process entrypoint: connect to Postgres and Redis, load
//! JWT signing keys, spawn the rotation and topology-heartbeat background
//! tasks, and serve the HTTP API until a shutdown signal arrives.

mod admin_user;
mod audit;
mod config;
mod db;
mod error;
mod file_registry;
mod http;
mod jwt_rotation;
mod password;
mod service_account;
mod state;
mod storage_element;
mod topology;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use config::AdminConfig;
use state::AppState;

#[derive(Debug, Parser)]
#[command(name = "admin-module")]
struct Args {
    #[arg(long, default_value = "config/admin-module.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    artstore_common::logging::init("admin-module", "info");

    let config: AdminConfig = artstore_common::config::load(&args.config, "APP")?;
    info!(bind_addr = %config.bind_addr, "starting admin-module");

    let pool = db::connect(&config.database_url).await?;

    let redis_client = redis::Client::open(config.redis_url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;

    let jwt = artstore_jwt::KeyManager::load(Some(&config.jwt_private_key), &config.jwt_public_key)?;
    jwt.start_watching()?;

    let app = Arc::new(AppState {
        config: config.clone(),
        pool: pool.clone(),
        redis: redis_conn.clone(),
        jwt: Arc::clone(&jwt),
    });

    let rotation_task = tokio::spawn(jwt_rotation::run(
        Arc::clone(&jwt),
        pool.clone(),
        redis_conn.clone(),
        Duration::from_secs(config.rotation_check_interval_secs),
        artstore_common::shutdown::signal(),
    ));

    let heartbeat_task = tokio::spawn(topology::heartbeat(
        pool.clone(),
        redis_conn.clone(),
        Duration::from_secs(config.heartbeat_interval_secs),
        artstore_common::shutdown::signal(),
    ));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(bind_addr = %config.bind_addr, "admin-module listening");

    let router = http::router(app);
    axum::serve(listener, router).with_graceful_shutdown(artstore_common::shutdown::signal()).await?;

    rotation_task.await.ok();
    heartbeat_task.await.ok();
    info!("admin-module shut down cleanly");
    Ok(())
}
