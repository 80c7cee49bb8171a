//! In-memory mirror of admin-module's storage-element topology (spec §4.5
//! "Topology bus"): hydrate once from the TTL'd bootstrap key, then track
//! live updates from the pub/sub channel for the life of the process.
//!
//! The Redis registry hash (`storage:elements:{id}`) and priority sorted
//! sets carry live capacity numbers but not an element's `api_url` — only
//! admin-module's snapshot does, since that's the CRUD source of truth.
//! The selector therefore needs both: registry for "is this candidate
//! currently write-eligible", topology for "where do I send the bytes".

use std::collections::HashMap;
use std::sync::Arc;

use artstore_redis::topology::TopologySnapshot;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

const CHANNEL: &str = "artstore:service_discovery";
const BOOTSTRAP_KEY: &str = "artstore:storage_elements";

/// The fields of admin-module's storage-element view that the selector and
/// proxy actually need. Deliberately narrower than `admin.v1.storage_elements`
/// — this is the one place outside admin-module that shape is duplicated,
/// via `#[serde(skip_deserializing_if)]`-free plain fields so unused extra
/// keys in the wire payload are ignored rather than failing deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageElementSummary {
    pub element_id: String,
    pub api_url: String,
    pub mode: String,
    pub status: String,
    pub capacity_bytes: i64,
}

/// Shared, hot-swappable view of the current topology. Reads never block on
/// the subscriber task; a stale snapshot is preferable to a request that
/// can't proceed while a refresh is mid-flight.
#[derive(Default)]
pub struct TopologyCache {
    by_id: RwLock<HashMap<String, StorageElementSummary>>,
    version: std::sync::atomic::AtomicU64,
}

impl TopologyCache {
    /// Read the current summary for `element_id`, if known.
    pub async fn get(&self, element_id: &str) -> Option<StorageElementSummary> {
        self.by_id.read().await.get(element_id).cloned()
    }

    async fn apply(&self, snapshot: TopologySnapshot<StorageElementSummary>) {
        let previous = self.version.load(std::sync::atomic::Ordering::SeqCst);
        if snapshot.version <= previous && previous != 0 {
            return;
        }
        self.version.store(snapshot.version, std::sync::atomic::Ordering::SeqCst);

        let mut map = HashMap::with_capacity(snapshot.storage_elements.len());
        for element in snapshot.storage_elements {
            map.insert(element.element_id.clone(), element);
        }
        *self.by_id.write().await = map;
    }
}

/// Hydrate `cache` once from the bootstrap key, then run forever applying
/// live updates from the pub/sub channel (ignoring any snapshot whose
/// version does not exceed the last one seen) until `shutdown` fires.
pub async fn run(
    cache: Arc<TopologyCache>,
    redis_client: redis::Client,
    mut bootstrap_conn: redis::aio::ConnectionManager,
    shutdown: impl std::future::Future<Output = ()>,
) {
    use futures::StreamExt;

    match artstore_redis::topology::bootstrap::<StorageElementSummary>(&mut bootstrap_conn, BOOTSTRAP_KEY).await {
        Ok(Some(snapshot)) => {
            tracing::info!(count = snapshot.count, "hydrated topology from bootstrap key");
            cache.apply(snapshot).await;
        }
        Ok(None) => tracing::warn!("no topology bootstrap key present yet; starting with an empty view"),
        Err(e) => tracing::warn!(error = %e, "topology bootstrap read failed; starting with an empty view"),
    }

    let stream = match artstore_redis::topology::subscribe::<StorageElementSummary>(&redis_client, CHANNEL.to_string()).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "failed to subscribe to topology channel; topology will never update");
            shutdown.await;
            return;
        }
    };
    tokio::pin!(stream);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            maybe_snapshot = stream.next() => {
                match maybe_snapshot {
                    Some(snapshot) => cache.apply(snapshot).await,
                    None => {
                        tracing::warn!("topology subscription stream ended");
                        return;
                    }
                }
            }
            _ = &mut shutdown => {
                tracing::info!("topology subscriber shutting down");
                return;
            }
        }
    }
}
