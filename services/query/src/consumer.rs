//! File-events consumer: `XREADGROUP` → upsert/delete the search row →
//! `XACK`, with PEL-based retry and dead-letter overflow (spec §4.5).
//!
//! Delivery count isn't tracked by Redis in a form the helper crate
//! surfaces, so retries are counted in-process per stream entry id; a
//! process restart resets the count; a few extra attempts after a crash is
//! an acceptable cost against the alternative of a second round-trip
//! (`XPENDING`) on every read.

use std::collections::HashMap;
use std::sync::Arc;

use artstore_redis::events::{self, DeliveredEvent};
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use uuid::Uuid;

use crate::search::{self, EventMetadata};
use crate::topology::TopologyLookup;

const READ_BATCH: usize = 50;
const BLOCK_MS: usize = 5_000;

pub async fn run(
    pool: PgPool,
    mut conn: ConnectionManager,
    group: String,
    consumer: String,
    max_retries: u32,
    topology: Arc<TopologyLookup>,
    shutdown: impl std::future::Future<Output = ()>,
) {
    if let Err(e) = events::ensure_consumer_group(&mut conn, &group).await {
        tracing::error!(error = %e, "failed to create/verify consumer group; consumer will not run");
        return;
    }

    let mut delivery_counts: HashMap<String, u32> = HashMap::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("file-events consumer shutting down");
                return;
            }
            reclaimed = events::read_pending(&mut conn, &group, &consumer, READ_BATCH) => {
                match reclaimed {
                    Ok(events) if !events.is_empty() => {
                        process_batch(&pool, &mut conn, &group, &topology, events, max_retries, &mut delivery_counts).await;
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "reading pending entries failed"),
                }
            }
        }

        let new_events = events::read_new(&mut conn, &group, &consumer, READ_BATCH, BLOCK_MS).await;
        match new_events {
            Ok(events) if !events.is_empty() => {
                process_batch(&pool, &mut conn, &group, &topology, events, max_retries, &mut delivery_counts).await;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "reading new file-events failed; backing off");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

async fn process_batch(
    pool: &PgPool,
    conn: &mut ConnectionManager,
    group: &str,
    topology: &Arc<TopologyLookup>,
    delivered: Vec<DeliveredEvent>,
    max_retries: u32,
    delivery_counts: &mut HashMap<String, u32>,
) {
    for mut event in delivered {
        let attempt = delivery_counts.entry(event.stream_id.clone()).or_insert(0);
        event.delivery_count = *attempt;

        match apply(pool, topology, &event).await {
            Ok(()) => {
                if let Err(e) = events::ack(conn, group, &event.stream_id).await {
                    tracing::warn!(error = %e, stream_id = %event.stream_id, "ack failed, entry will be redelivered");
                }
                delivery_counts.remove(&event.stream_id);
            }
            Err(e) => {
                *attempt += 1;
                tracing::warn!(error = %e, stream_id = %event.stream_id, attempt = *attempt, "file event processing failed");
                if *attempt >= max_retries {
                    if let Err(e) = events::move_to_dead_letter(conn, group, &event, &e.to_string()).await {
                        tracing::error!(error = %e, stream_id = %event.stream_id, "failed to move entry to dead letter");
                    } else {
                        tracing::error!(stream_id = %event.stream_id, "file event moved to dead-letter stream after exhausting retries");
                    }
                    delivery_counts.remove(&event.stream_id);
                }
            }
        }
    }
}

async fn apply(
    pool: &PgPool,
    topology: &Arc<TopologyLookup>,
    delivered: &DeliveredEvent,
) -> Result<(), crate::error::QueryError> {
    if search::already_processed(pool, &delivered.stream_id).await? {
        return Ok(());
    }

    let event = &delivered.event;
    let file_id: Uuid = event
        .file_id
        .parse()
        .map_err(|_| crate::error::QueryError::Validation(format!("malformed file_id in event: {}", event.file_id)))?;
    let storage_element_id: Uuid = event.storage_element_id.parse().map_err(|_| {
        crate::error::QueryError::Validation(format!("malformed storage_element_id in event: {}", event.storage_element_id))
    })?;

    match event.event_type.as_str() {
        "file:created" | "file:updated" => {
            let raw = event
                .metadata
                .as_deref()
                .ok_or_else(|| crate::error::QueryError::Validation("create/update event missing metadata".into()))?;
            let metadata: EventMetadata = serde_json::from_str(raw)
                .map_err(|e| crate::error::QueryError::Validation(format!("malformed event metadata: {e}")))?;
            let api_url = topology.api_url_for(&event.storage_element_id).await;
            search::upsert(pool, file_id, storage_element_id, api_url.as_deref(), metadata).await?;
        }
        "file:deleted" => {
            let deleted_at = event
                .deleted_at
                .and_then(chrono::DateTime::from_timestamp_millis)
                .unwrap_or_else(chrono::Utc::now);
            search::mark_deleted(pool, file_id, deleted_at).await?;
        }
        other => {
            tracing::debug!(event_type = other, "ignoring unrecognized file event type");
        }
    }

    search::mark_processed(pool, &delivered.stream_id, file_id, &event.event_type).await?;
    Ok(())
}
