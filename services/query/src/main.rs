//! query process entrypoint: load config, hydrate topology, run the
//! file-events consumer loop alongside the HTTP API until shutdown.

mod config;
mod consumer;
mod db;
mod error;
mod http;
mod search;
mod state;
mod topology;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use config::QueryConfig;
use state::AppState;
use topology::TopologyLookup;

#[derive(Debug, Parser)]
#[command(name = "query")]
struct Args {
    #[arg(long, default_value = "config/query.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    artstore_common::logging::init("query", "info");

    let config: QueryConfig = artstore_common::config::load(&args.config, "QUERY")?;
    info!(bind_addr = %config.bind_addr, consumer_group = %config.consumer_group, "starting query");

    let pool = db::connect(&config.database_url).await?;

    let jwt = artstore_jwt::KeyManager::load(None, &config.jwt_public_key)?;
    jwt.start_watching()?;

    let redis_client = redis::Client::open(config.redis_url.as_str())?;
    let topology_conn = redis::aio::ConnectionManager::new(redis_client.clone()).await?;
    let consumer_conn = redis::aio::ConnectionManager::new(redis_client.clone()).await?;

    let topology = Arc::new(TopologyLookup::default());

    let topology_task = tokio::spawn(topology::run(
        Arc::clone(&topology),
        redis_client,
        topology_conn,
        artstore_common::shutdown::signal(),
    ));

    let consumer_task = tokio::spawn(consumer::run(
        pool.clone(),
        consumer_conn,
        config.consumer_group.clone(),
        config.consumer_name.clone(),
        config.max_retries,
        Arc::clone(&topology),
        artstore_common::shutdown::signal(),
    ));

    let app = Arc::new(AppState { pool, jwt });
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(bind_addr = %config.bind_addr, "query listening");

    let router = http::router(Arc::clone(&app));
    axum::serve(listener, router).with_graceful_shutdown(artstore_common::shutdown::signal()).await?;

    topology_task.await.ok();
    consumer_task.await.ok();
    info!("query shut down cleanly");
    Ok(())
}
