//! Storage-element registry CRUD (spec §4.3 "Storage-element CRUD";
//! `admin.v1.storage_elements` is the canonical shape per spec §9).

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AdminError;
use crate::topology;

/// The canonical on-the-wire storage-element shape (spec §9 open question:
/// `admin.v1.storage_elements`, not the storage-element service's own
/// narrower internal `StorageMode` view).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StorageElementView {
    pub id: Uuid,
    pub name: String,
    pub element_id: String,
    pub mode: String,
    pub storage_type: String,
    pub api_url: String,
    pub base_path: String,
    pub capacity_bytes: i64,
    pub used_bytes: i64,
    pub file_count: i64,
    pub priority: i32,
    pub retention_days: i32,
    pub status: String,
    pub last_health_check: Option<DateTime<Utc>>,
}

/// Request body shared by create and update (full replace semantics).
#[derive(Debug, Deserialize)]
pub struct StorageElementInput {
    pub name: String,
    pub element_id: String,
    pub storage_type: String,
    pub api_url: String,
    pub base_path: String,
    pub capacity_bytes: i64,
    pub priority: i32,
    pub retention_days: i32,
}

async fn publish_snapshot(pool: &PgPool, redis: &mut ConnectionManager) -> Result<(), AdminError> {
    let elements = list(pool).await?;
    let version: i64 = sqlx::query_scalar("SELECT (extract(epoch from clock_timestamp()) * 1000)::bigint")
        .fetch_one(pool)
        .await
        .unwrap_or(0);
    let snapshot = artstore_redis::topology::TopologySnapshot::new(version as u64, elements);
    topology::publish(redis, &snapshot).await?;
    Ok(())
}

/// Create a storage element, starting in `EDIT` mode and `ONLINE` status,
/// then write an audit entry and republish the topology snapshot.
pub async fn create(
    pool: &PgPool,
    redis: &mut ConnectionManager,
    input: StorageElementInput,
) -> Result<StorageElementView, AdminError> {
    let id = Uuid::new_v4();
    let row: StorageElementView = sqlx::query_as(
        "INSERT INTO storage_elements (id, name, element_id, mode, storage_type, api_url, base_path, capacity_bytes, priority, retention_days, status)
         VALUES ($1, $2, $3, 'EDIT', $4, $5, $6, $7, $8, $9, 'ONLINE')
         RETURNING id, name, element_id, mode, storage_type, api_url, base_path, capacity_bytes, used_bytes, file_count, priority, retention_days, status, last_health_check",
    )
    .bind(id)
    .bind(&input.name)
    .bind(&input.element_id)
    .bind(&input.storage_type)
    .bind(&input.api_url)
    .bind(&input.base_path)
    .bind(input.capacity_bytes)
    .bind(input.priority)
    .bind(input.retention_days)
    .fetch_one(pool)
    .await?;

    publish_snapshot(pool, redis).await?;
    Ok(row)
}

/// Update the mutable attributes of a storage element. `element_id` never
/// changes post-creation (spec §3 invariant), so it is read-only here.
pub async fn update(
    pool: &PgPool,
    redis: &mut ConnectionManager,
    id: Uuid,
    input: StorageElementInput,
) -> Result<StorageElementView, AdminError> {
    let row: StorageElementView = sqlx::query_as(
        "UPDATE storage_elements
         SET name = $1, storage_type = $2, api_url = $3, base_path = $4, capacity_bytes = $5, priority = $6, retention_days = $7, updated_at = now()
         WHERE id = $8
         RETURNING id, name, element_id, mode, storage_type, api_url, base_path, capacity_bytes, used_bytes, file_count, priority, retention_days, status, last_health_check",
    )
    .bind(&input.name)
    .bind(&input.storage_type)
    .bind(&input.api_url)
    .bind(&input.base_path)
    .bind(input.capacity_bytes)
    .bind(input.priority)
    .bind(input.retention_days)
    .bind(id)
    .fetch_one(pool)
    .await?;

    publish_snapshot(pool, redis).await?;
    Ok(row)
}

/// Apply a mode transition (spec §4.2 table, enforced again here since the
/// admin record is the long-lived source of truth for `mode`).
pub async fn change_mode(
    pool: &PgPool,
    redis: &mut ConnectionManager,
    id: Uuid,
    new_mode: &str,
) -> Result<StorageElementView, AdminError> {
    let current: String = sqlx::query_scalar("SELECT mode FROM storage_elements WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await?;

    let allowed = matches!((current.as_str(), new_mode), ("RW", "RO") | ("RO", "AR"));
    if !allowed {
        return Err(AdminError::Validation(format!("{current} -> {new_mode} is not a permitted transition")));
    }

    let row: StorageElementView = sqlx::query_as(
        "UPDATE storage_elements SET mode = $1, updated_at = now() WHERE id = $2
         RETURNING id, name, element_id, mode, storage_type, api_url, base_path, capacity_bytes, used_bytes, file_count, priority, retention_days, status, last_health_check",
    )
    .bind(new_mode)
    .bind(id)
    .fetch_one(pool)
    .await?;

    publish_snapshot(pool, redis).await?;
    Ok(row)
}

/// Logical delete only — no cascade of file bytes (spec §3 lifecycle note).
pub async fn delete(pool: &PgPool, redis: &mut ConnectionManager, id: Uuid) -> Result<(), AdminError> {
    sqlx::query("UPDATE storage_elements SET deleted_at = now(), status = 'OFFLINE' WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    publish_snapshot(pool, redis).await?;
    Ok(())
}

/// List all non-deleted storage elements.
pub async fn list(pool: &PgPool) -> Result<Vec<StorageElementView>, AdminError> {
    let rows = sqlx::query_as(
        "SELECT id, name, element_id, mode, storage_type, api_url, base_path, capacity_bytes, used_bytes, file_count, priority, retention_days, status, last_health_check
         FROM storage_elements WHERE deleted_at IS NULL ORDER BY priority",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Fetch one storage element by ID.
pub async fn get(pool: &PgPool, id: Uuid) -> Result<StorageElementView, AdminError> {
    let row = sqlx::query_as(
        "SELECT id, name, element_id, mode, storage_type, api_url, base_path, capacity_bytes, used_bytes, file_count, priority, retention_days, status, last_health_check
         FROM storage_elements WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}
