//! The `file-events` Redis Stream: at-least-once delivery with consumer
//! groups, explicit ack, Pending-Entry-List retry and a dead-letter stream
//! after K retries (spec §4.5 "File events").

use redis::aio::ConnectionManager;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use crate::error::RedisHelperError;

/// Main event stream key.
pub const STREAM_KEY: &str = "file-events";
/// Dead-letter stream key (spec §4.5 supplement).
pub const DEAD_LETTER_KEY: &str = "file-events:dead";

/// One file-lifecycle event as carried on the stream.
#[derive(Debug, Clone)]
pub struct FileEvent {
    /// e.g. `"file:created"`, `"file:updated"`, `"file:deleted"`.
    pub event_type: String,
    /// Unix millis the event was produced.
    pub timestamp: i64,
    /// Subject file.
    pub file_id: String,
    /// Storage element holding (or having held) the file.
    pub storage_element_id: String,
    /// JSON-encoded metadata payload, present for create/update.
    pub metadata: Option<String>,
    /// Unix millis of deletion, present for delete events only.
    pub deleted_at: Option<i64>,
}

impl FileEvent {
    fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("event_type", self.event_type.clone()),
            ("timestamp", self.timestamp.to_string()),
            ("file_id", self.file_id.clone()),
            ("storage_element_id", self.storage_element_id.clone()),
        ];
        if let Some(metadata) = &self.metadata {
            fields.push(("metadata", metadata.clone()));
        }
        if let Some(deleted_at) = self.deleted_at {
            fields.push(("deleted_at", deleted_at.to_string()));
        }
        fields
    }

    fn from_map(map: &std::collections::HashMap<String, redis::Value>) -> Option<Self> {
        let get_string = |k: &str| -> Option<String> {
            match map.get(k)? {
                redis::Value::BulkString(b) => Some(String::from_utf8_lossy(b).into_owned()),
                redis::Value::SimpleString(s) => Some(s.clone()),
                _ => None,
            }
        };
        Some(Self {
            event_type: get_string("event_type")?,
            timestamp: get_string("timestamp")?.parse().ok()?,
            file_id: get_string("file_id")?,
            storage_element_id: get_string("storage_element_id")?,
            metadata: get_string("metadata"),
            deleted_at: get_string("deleted_at").and_then(|v| v.parse().ok()),
        })
    }
}

/// A delivered event along with its stream entry ID, needed for `xack`.
#[derive(Debug, Clone)]
pub struct DeliveredEvent {
    /// The stream entry ID (e.g. `"1699999999999-0"`).
    pub stream_id: String,
    /// The decoded event.
    pub event: FileEvent,
    /// How many times this ID has already been redelivered, tracked by the caller.
    pub delivery_count: u32,
}

/// Append `event` to the stream, capping retained length to roughly `maxlen`.
pub async fn publish(
    conn: &mut ConnectionManager,
    event: &FileEvent,
    maxlen: usize,
) -> Result<String, RedisHelperError> {
    let id: String = conn
        .xadd_maxlen(STREAM_KEY, StreamMaxlen::Approx(maxlen), "*", &event.to_fields())
        .await?;
    Ok(id)
}

/// Create the consumer group if it doesn't already exist (idempotent —
/// `BUSYGROUP` is swallowed).
pub async fn ensure_consumer_group(
    conn: &mut ConnectionManager,
    group: &str,
) -> Result<(), RedisHelperError> {
    let result: redis::RedisResult<()> = conn.xgroup_create_mkstream(STREAM_KEY, group, "$").await;
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Read up to `count` new events for `consumer` in `group`, blocking up to
/// `block_ms` if none are immediately available.
pub async fn read_new(
    conn: &mut ConnectionManager,
    group: &str,
    consumer: &str,
    count: usize,
    block_ms: usize,
) -> Result<Vec<DeliveredEvent>, RedisHelperError> {
    let opts = StreamReadOptions::default()
        .group(group, consumer)
        .count(count)
        .block(block_ms);
    let reply: StreamReadReply = conn.xread_options(&[STREAM_KEY], &[">"], &opts).await?;
    Ok(decode_reply(reply))
}

/// Re-claim this consumer's own still-pending entries (delivered but never
/// acked, e.g. after a crash mid-processing) by reading from `"0"` instead
/// of `">"` — Redis returns the consumer's own PEL rather than new entries.
pub async fn read_pending(
    conn: &mut ConnectionManager,
    group: &str,
    consumer: &str,
    count: usize,
) -> Result<Vec<DeliveredEvent>, RedisHelperError> {
    let opts = StreamReadOptions::default().group(group, consumer).count(count);
    let reply: StreamReadReply = conn.xread_options(&[STREAM_KEY], &["0"], &opts).await?;
    Ok(decode_reply(reply))
}

fn decode_reply(reply: StreamReadReply) -> Vec<DeliveredEvent> {
    let mut out = Vec::new();
    for stream_key in reply.keys {
        for stream_id in stream_key.ids {
            if let Some(event) = FileEvent::from_map(&stream_id.map) {
                out.push(DeliveredEvent { stream_id: stream_id.id, event, delivery_count: 0 });
            }
        }
    }
    out
}

/// Acknowledge successful processing of one entry.
pub async fn ack(
    conn: &mut ConnectionManager,
    group: &str,
    stream_id: &str,
) -> Result<(), RedisHelperError> {
    conn.xack::<_, _, _, ()>(STREAM_KEY, group, &[stream_id]).await?;
    Ok(())
}

/// Move an entry that has exceeded its retry budget to the dead-letter
/// stream, then ack the original so it leaves the group's PEL.
pub async fn move_to_dead_letter(
    conn: &mut ConnectionManager,
    group: &str,
    delivered: &DeliveredEvent,
    last_error: &str,
) -> Result<(), RedisHelperError> {
    let mut fields = delivered.event.to_fields();
    fields.push(("retry_count", delivered.delivery_count.to_string()));
    fields.push(("last_error", last_error.to_string()));
    let _: String = conn.xadd(DEAD_LETTER_KEY, "*", &fields).await?;
    ack(conn, group, &delivered.stream_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_fields() {
        let event = FileEvent {
            event_type: "file:created".into(),
            timestamp: 1_700_000_000_000,
            file_id: "f1".into(),
            storage_element_id: "se1".into(),
            metadata: Some("{\"size\":10}".into()),
            deleted_at: None,
        };
        let fields = event.to_fields();
        assert!(fields.iter().any(|(k, v)| *k == "file_id" && v == "f1"));
        assert!(!fields.iter().any(|(k, _)| *k == "deleted_at"));
    }
}
