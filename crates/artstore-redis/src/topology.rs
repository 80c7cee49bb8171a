//! Cluster topology bus: a pub/sub channel for live updates plus a TTL'd
//! key so late subscribers can bootstrap (spec §4.5 "Topology bus").
//!
//! Topology snapshots tolerate a missed publish — a subscriber that
//! reconnects just re-reads the key — so pub/sub plus a mirrored key is
//! sufficient here, unlike the file-events bus which needs Streams'
//! durability and ack semantics.

use futures::Stream;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::RedisHelperError;

/// A full topology snapshot, generic over the storage-element summary type
/// so this crate never depends on admin-module's domain types.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TopologySnapshot<T> {
    /// Monotonically increasing per-publisher version.
    pub version: u64,
    /// Unix millis at publish time.
    pub timestamp: i64,
    /// `storage_elements.len()`, carried redundantly for quick client-side checks.
    pub count: usize,
    /// Current membership.
    pub storage_elements: Vec<T>,
}

impl<T> TopologySnapshot<T> {
    /// Build a snapshot, computing `count` and `timestamp` from `storage_elements`.
    pub fn new(version: u64, storage_elements: Vec<T>) -> Self {
        Self {
            version,
            timestamp: chrono::Utc::now().timestamp_millis(),
            count: storage_elements.len(),
            storage_elements,
        }
    }
}

/// Publish `snapshot` on `channel` and mirror it into `bootstrap_key` with
/// `ttl_secs` (spec default ~1h).
pub async fn publish_snapshot<T: Serialize + Sync>(
    conn: &mut ConnectionManager,
    channel: &str,
    bootstrap_key: &str,
    ttl_secs: u64,
    snapshot: &TopologySnapshot<T>,
) -> Result<(), RedisHelperError> {
    let payload = serde_json::to_string(snapshot)?;
    conn.publish::<_, _, ()>(channel, &payload).await?;
    conn.set_ex::<_, _, ()>(bootstrap_key, &payload, ttl_secs).await?;
    Ok(())
}

/// Read the last-mirrored snapshot for a cold-starting subscriber.
pub async fn bootstrap<T: DeserializeOwned>(
    conn: &mut ConnectionManager,
    bootstrap_key: &str,
) -> Result<Option<TopologySnapshot<T>>, RedisHelperError> {
    let raw: Option<String> = conn.get(bootstrap_key).await?;
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Subscribe to live topology updates on `channel`. Returns a stream of
/// decoded snapshots; malformed messages are dropped with a `warn` log
/// rather than terminating the stream.
pub async fn subscribe<T: DeserializeOwned + Send + 'static>(
    client: &redis::Client,
    channel: String,
) -> Result<impl Stream<Item = TopologySnapshot<T>>, RedisHelperError> {
    use futures::StreamExt;

    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(&channel).await?;

    let stream = pubsub.into_on_message().filter_map(|msg| async move {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "topology message had no string payload");
                return None;
            }
        };
        match serde_json::from_str::<TopologySnapshot<T>>(&payload) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed topology snapshot");
                None
            }
        }
    });

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_derives_count_and_timestamp() {
        let snap = TopologySnapshot::new(3, vec!["a", "b"]);
        assert_eq!(snap.version, 3);
        assert_eq!(snap.count, 2);
        assert!(snap.timestamp > 0);
    }
}
