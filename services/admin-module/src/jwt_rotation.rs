//! Scheduled JWT signing-key rotation, guarded by a Redis distributed lock
//! so only one admin-module replica rotates at a time (spec §4.3).

use std::sync::Arc;
use std::time::Duration;

use artstore_jwt::KeyManager;
use chrono::Utc;
use redis::aio::ConnectionManager;
use sqlx::PgPool;

const LOCK_KEY: &str = "jwt_rotation_lock";
const LOCK_TTL_SECS: u64 = 60;
const ROTATE_WITHIN: chrono::Duration = chrono::Duration::hours(1);

/// Run forever, checking every `check_interval` whether the active signing
/// key is close enough to expiry to warrant rotation, until `shutdown` fires.
pub async fn run(
    key_manager: Arc<KeyManager>,
    pool: PgPool,
    mut redis: ConnectionManager,
    check_interval: Duration,
    shutdown: impl std::future::Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(check_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = check_and_rotate(&key_manager, &pool, &mut redis).await {
                    tracing::warn!(error = %e, "jwt rotation pass failed");
                }
            }
            _ = &mut shutdown => {
                tracing::info!("jwt rotation task shutting down");
                return;
            }
        }
    }
}

async fn check_and_rotate(
    key_manager: &Arc<KeyManager>,
    pool: &PgPool,
    redis: &mut ConnectionManager,
) -> Result<(), crate::error::AdminError> {
    let Some(expires_at) = key_manager.primary_expires_at().await else {
        return Ok(());
    };
    if expires_at - Utc::now() > ROTATE_WITHIN {
        return Ok(());
    }

    let lock = match artstore_redis::lock::acquire(redis, LOCK_KEY, LOCK_TTL_SECS).await? {
        Some(lock) => lock,
        None => {
            tracing::debug!("rotation lock held by another instance, skipping");
            return Ok(());
        }
    };

    let started = std::time::Instant::now();
    let result = rotate(key_manager, pool).await;
    let duration_ms = started.elapsed().as_millis();

    match &result {
        Ok(version) => tracing::info!(version, duration_ms, "jwt key rotated"),
        Err(e) => tracing::warn!(error = %e, duration_ms, "jwt key rotation failed"),
    }

    artstore_redis::lock::release(redis, &lock).await?;
    result.map(|_| ())
}

/// Rotate immediately on an admin's explicit request, still serialized
/// against the scheduled task via the same distributed lock. Returns the
/// new key's version and expiry for the API response.
pub async fn force_rotate(
    key_manager: &Arc<KeyManager>,
    pool: &PgPool,
    redis: &mut ConnectionManager,
) -> Result<(String, chrono::DateTime<Utc>), crate::error::AdminError> {
    let lock = artstore_redis::lock::acquire(redis, LOCK_KEY, LOCK_TTL_SECS)
        .await?
        .ok_or_else(|| crate::error::AdminError::Conflict("rotation already in progress on another instance".into()))?;

    let result = rotate(key_manager, pool).await;
    artstore_redis::lock::release(redis, &lock).await?;
    let version = result?;
    let expires_at = key_manager.primary_expires_at().await.unwrap_or_else(Utc::now);
    Ok((version, expires_at))
}

async fn rotate(key_manager: &Arc<KeyManager>, pool: &PgPool) -> Result<String, crate::error::AdminError> {
    let new_key = key_manager.rotate().await.map_err(|e| crate::error::AdminError::Invariant(e.to_string()))?;
    key_manager.evict_expired().await;

    sqlx::query(
        "INSERT INTO jwt_keys (version, public_key_pem, private_key_pem, created_at, expires_at, is_active, rotation_count)
         VALUES ($1, $2, $3, $4, $5, true, $6)",
    )
    .bind(&new_key.version)
    .bind(&new_key.public_key_pem)
    .bind(new_key.private_key_pem.as_deref().unwrap_or_default())
    .bind(new_key.created_at)
    .bind(new_key.expires_at)
    .bind(new_key.rotation_count as i32)
    .execute(pool)
    .await?;

    sqlx::query("UPDATE jwt_keys SET is_active = false WHERE version != $1 AND expires_at < now()")
        .bind(&new_key.version)
        .execute(pool)
        .await?;

    Ok(new_key.version)
}
