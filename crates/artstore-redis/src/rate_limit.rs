//! Sliding-window rate limiter backed by a Redis sorted set (spec §4.6).
//!
//! Each request's arrival timestamp is a sorted-set member; the window is
//! trimmed with `ZREMRANGEBYSCORE` before counting, so the limit always
//! reflects the last `window_secs`, not a fixed bucket boundary.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Seconds the caller should wait before retrying, when not allowed.
    pub retry_after_secs: Option<u64>,
}

fn key(client_id: &str) -> String {
    format!("rate_limit:{client_id}")
}

/// Check and, if allowed, record one request for `client_id` against a
/// `limit`-per-`window_secs` sliding window. On any Redis error this fails
/// open (returns `allowed: true`) and logs a warning, per spec §4.6 and
/// §7's Transient-error handling.
pub async fn check(
    conn: &mut ConnectionManager,
    client_id: &str,
    limit: u32,
    window_secs: u64,
) -> RateLimitDecision {
    match check_inner(conn, client_id, limit, window_secs).await {
        Ok(decision) => decision,
        Err(e) => {
            tracing::warn!(error = %e, client_id, "rate limiter failing open on redis error");
            RateLimitDecision { allowed: true, retry_after_secs: None }
        }
    }
}

async fn check_inner(
    conn: &mut ConnectionManager,
    client_id: &str,
    limit: u32,
    window_secs: u64,
) -> redis::RedisResult<RateLimitDecision> {
    let key = key(client_id);
    let now_ms = chrono::Utc::now().timestamp_millis();
    let window_start = now_ms - (window_secs as i64 * 1000);

    conn.zrembyscore::<_, _, _, ()>(&key, "-inf", window_start).await?;
    let count: u64 = conn.zcard(&key).await?;

    if count < limit as u64 {
        let member = format!("{now_ms}-{}", Uuid::new_v4());
        conn.zadd::<_, _, _, ()>(&key, member, now_ms).await?;
        conn.expire::<_, ()>(&key, window_secs as i64).await?;
        return Ok(RateLimitDecision { allowed: true, retry_after_secs: None });
    }

    let oldest: Vec<(String, i64)> = conn.zrange_withscores(&key, 0, 0).await?;
    let retry_after_secs = oldest
        .first()
        .map(|(_, score)| {
            let expires_at = score + window_secs as i64 * 1000;
            ((expires_at - now_ms).max(0) as u64 + 999) / 1000
        })
        .unwrap_or(window_secs);

    Ok(RateLimitDecision { allowed: false, retry_after_secs: Some(retry_after_secs) })
}
