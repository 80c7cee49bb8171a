//! Storage-element health reporting and the priority sorted sets the
//! ingester's selector consults (spec §4.4, §4.5).
//!
//! Redis orders a sorted set by score first and, for ties, lexicographically
//! by member — exactly the "lower priority first, `element_id` tie-break"
//! rule the selector needs, so a plain `ZRANGE` already returns candidates
//! in selection order.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::RedisHelperError;

/// The two modes that accept writes and therefore participate in selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityMode {
    /// Read-write, steady state.
    Rw,
    /// Primary editable mode.
    Edit,
}

impl PriorityMode {
    fn key(self) -> &'static str {
        match self {
            PriorityMode::Rw => "storage:rw:by_priority",
            PriorityMode::Edit => "storage:edit:by_priority",
        }
    }
}

fn health_key(element_id: &str) -> String {
    format!("storage:elements:{element_id}")
}

/// Write a storage element's health-report hash, refreshing its TTL.
pub async fn write_health_report(
    conn: &mut ConnectionManager,
    element_id: &str,
    fields: &[(&str, String)],
    ttl_secs: u64,
) -> Result<(), RedisHelperError> {
    let key = health_key(element_id);
    let _: () = conn.hset_multiple(&key, fields).await?;
    conn.expire::<_, ()>(&key, ttl_secs as i64).await?;
    Ok(())
}

/// Update which priority sorted set (if any) an element belongs to. Pass
/// `None` when the element is `FULL` or read-only (`RO`/`AR`) — those
/// never appear in either set and so are invisible to the selector.
pub async fn update_priority_membership(
    conn: &mut ConnectionManager,
    element_id: &str,
    mode: Option<PriorityMode>,
    priority: u16,
) -> Result<(), RedisHelperError> {
    for candidate in [PriorityMode::Rw, PriorityMode::Edit] {
        if Some(candidate) != mode {
            conn.zrem::<_, _, ()>(candidate.key(), element_id).await?;
        }
    }
    if let Some(mode) = mode {
        conn.zadd::<_, _, _, ()>(mode.key(), element_id, priority as f64).await?;
    }
    Ok(())
}

/// Remove an element from its health hash and both priority sets — run on
/// graceful shutdown.
pub async fn deregister(
    conn: &mut ConnectionManager,
    element_id: &str,
) -> Result<(), RedisHelperError> {
    conn.del::<_, ()>(health_key(element_id)).await?;
    for mode in [PriorityMode::Rw, PriorityMode::Edit] {
        conn.zrem::<_, _, ()>(mode.key(), element_id).await?;
    }
    Ok(())
}

/// Candidate element IDs for `mode`, already ordered lowest-priority-first
/// with lexicographic tie-break.
pub async fn candidates(
    conn: &mut ConnectionManager,
    mode: PriorityMode,
) -> Result<Vec<String>, RedisHelperError> {
    Ok(conn.zrange(mode.key(), 0, -1).await?)
}

/// Read a storage element's health-report hash as raw field/value pairs.
pub async fn read_health_report(
    conn: &mut ConnectionManager,
    element_id: &str,
) -> Result<std::collections::HashMap<String, String>, RedisHelperError> {
    Ok(conn.hgetall(health_key(element_id)).await?)
}
