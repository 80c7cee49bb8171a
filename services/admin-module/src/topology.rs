//! Topology snapshot publisher: pub/sub channel + TTL'd bootstrap key
//! (spec §4.5 "Topology bus"), published on every storage-element CRUD
//! and on a periodic heartbeat.

use std::time::Duration;

use artstore_redis::topology::TopologySnapshot;
use redis::aio::ConnectionManager;
use sqlx::PgPool;

use crate::error::AdminError;
use crate::storage_element::StorageElementView;

const CHANNEL: &str = "artstore:service_discovery";
const BOOTSTRAP_KEY: &str = "artstore:storage_elements";
const BOOTSTRAP_TTL_SECS: u64 = 3600;

/// Publish `snapshot` on the topology channel and mirror it into the
/// bootstrap key.
pub async fn publish(
    redis: &mut ConnectionManager,
    snapshot: &TopologySnapshot<StorageElementView>,
) -> Result<(), AdminError> {
    artstore_redis::topology::publish_snapshot(redis, CHANNEL, BOOTSTRAP_KEY, BOOTSTRAP_TTL_SECS, snapshot).await?;
    Ok(())
}

/// Periodically republish the current full snapshot so a subscriber that
/// missed a CRUD-triggered publish still converges within `interval`.
pub async fn heartbeat(
    pool: PgPool,
    mut redis: ConnectionManager,
    interval: Duration,
    shutdown: impl std::future::Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match crate::storage_element::list(&pool).await {
                    Ok(elements) => {
                        let version = chrono::Utc::now().timestamp() as u64;
                        let snapshot = TopologySnapshot::new(version, elements);
                        if let Err(e) = publish(&mut redis, &snapshot).await {
                            tracing::warn!(error = %e, "topology heartbeat publish failed");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "topology heartbeat failed to load storage elements"),
                }
            }
            _ = &mut shutdown => {
                tracing::info!("topology heartbeat task shutting down");
                return;
            }
        }
    }
}
