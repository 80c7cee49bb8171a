//! In-memory mirror of admin-module's storage-element topology, trimmed to
//! exactly what query needs: mapping a storage-element id to its current
//! `api_url` for download redirection and for denormalizing into
//! `search_documents` (spec §4.5 "Topology bus").

use std::collections::HashMap;
use std::sync::Arc;

use artstore_redis::topology::TopologySnapshot;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

const CHANNEL: &str = "artstore:service_discovery";
const BOOTSTRAP_KEY: &str = "artstore:storage_elements";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageElementSummary {
    pub element_id: String,
    pub api_url: String,
}

#[derive(Default)]
pub struct TopologyLookup {
    by_id: RwLock<HashMap<String, String>>,
    version: std::sync::atomic::AtomicU64,
}

impl TopologyLookup {
    pub async fn api_url_for(&self, element_id: &str) -> Option<String> {
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
            map.insert(element.element_id, element.api_url);
        }
        *self.by_id.write().await = map;
    }
}

pub async fn run(
    lookup: Arc<TopologyLookup>,
    redis_client: redis::Client,
    mut bootstrap_conn: redis::aio::ConnectionManager,
    shutdown: impl std::future::Future<Output = ()>,
) {
    use futures::StreamExt;

    match artstore_redis::topology::bootstrap::<StorageElementSummary>(&mut bootstrap_conn, BOOTSTRAP_KEY).await {
        Ok(Some(snapshot)) => lookup.apply(snapshot).await,
        Ok(None) => tracing::warn!("no topology bootstrap key present yet; download redirection will lack api_urls until the first snapshot"),
        Err(e) => tracing::warn!(error = %e, "topology bootstrap read failed"),
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
                    Some(snapshot) => lookup.apply(snapshot).await,
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
