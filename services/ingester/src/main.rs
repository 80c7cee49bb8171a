//! ingester process entrypoint: load config, hydrate the topology cache,
//! bind the HTTP API, and serve until a shutdown signal arrives.

mod config;
mod error;
mod http;
mod proxy;
mod selector;
mod state;
mod topology;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use config::IngesterConfig;
use state::AppState;
use topology::TopologyCache;

/// Command-line flags, overlaid onto the YAML + env-var config layers.
#[derive(Debug, Parser)]
#[command(name = "ingester")]
struct Args {
    /// Path to the service's YAML config file.
    #[arg(long, default_value = "config/ingester.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    artstore_common::logging::init("ingester", "info");

    let config: IngesterConfig = artstore_common::config::load(&args.config, "INGESTER")?;
    info!(bind_addr = %config.bind_addr, "starting ingester");

    let jwt = artstore_jwt::KeyManager::load(None, &config.jwt_public_key)?;
    jwt.start_watching()?;

    let redis_client = redis::Client::open(config.redis_url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client.clone()).await?;

    let topology = Arc::new(TopologyCache::default());

    let app = Arc::new(AppState {
        config: config.clone(),
        jwt,
        redis: tokio::sync::Mutex::new(redis_conn.clone()),
        topology: Arc::clone(&topology),
        http: reqwest::Client::new(),
    });

    let topology_task = tokio::spawn(topology::run(
        Arc::clone(&topology),
        redis_client,
        redis_conn,
        artstore_common::shutdown::signal(),
    ));

    let listener = tokio::net::TcpListener::bind(&app.config.bind_addr).await?;
    info!(bind_addr = %app.config.bind_addr, "ingester listening");

    let router = http::router(Arc::clone(&app));
    axum::serve(listener, router).with_graceful_shutdown(artstore_common::shutdown::signal()).await?;

    topology_task.await.ok();
    info!("ingester shut down cleanly");
    Ok(())
}
