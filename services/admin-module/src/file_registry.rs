//! File registry: the admin-owned record of every uploaded file (spec §3
//! "File", §4.3 "File-registry service"). The storage-element keeps its
//! own cache row as a convenience index; this table is the source of truth
//! for search, lifecycle and cross-service lookups.

use artstore_redis::events::FileEvent;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AdminError;

const EVENT_STREAM_MAXLEN: usize = 100_000;

/// Public file-registry row shape.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileRecord {
    pub file_id: Uuid,
    pub original_filename: String,
    pub storage_filename: String,
    pub file_size: i64,
    pub checksum_sha256: String,
    pub content_type: String,
    pub description: Option<String>,
    pub retention_policy: String,
    pub ttl_expires_at: Option<DateTime<Utc>>,
    pub ttl_days: Option<i32>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub storage_element_id: Uuid,
    pub storage_path: String,
    pub compressed: bool,
    pub compression_algorithm: Option<String>,
    pub original_size: Option<i64>,
    pub uploaded_by: String,
    pub upload_source_ip: Option<String>,
    pub user_metadata: Value,
}

/// Body the ingester posts after a storage-element accepts an upload.
#[derive(Debug, Deserialize)]
pub struct RegisterInput {
    /// The id storage-element minted when it wrote the data file and
    /// attr.json sidecar — the registry's `file_id` is this same id, not a
    /// freshly generated one, so storage-element's cache row, the registry
    /// row and query's search row all share one canonical `file_id`.
    pub file_id: Uuid,
    pub original_filename: String,
    pub storage_filename: String,
    pub file_size: i64,
    pub checksum_sha256: String,
    pub content_type: String,
    pub description: Option<String>,
    pub retention_days: i32,
    pub storage_element_id: Uuid,
    pub storage_path: String,
    pub uploaded_by: String,
    pub upload_source_ip: Option<String>,
    pub user_metadata: Option<Value>,
}

async fn emit(
    redis: &mut ConnectionManager,
    event_type: &str,
    file_id: Uuid,
    storage_element_id: Uuid,
    metadata: Option<Value>,
    deleted_at: Option<DateTime<Utc>>,
) -> Result<(), AdminError> {
    let event = FileEvent {
        event_type: event_type.to_string(),
        timestamp: Utc::now().timestamp_millis(),
        file_id: file_id.to_string(),
        storage_element_id: storage_element_id.to_string(),
        metadata: metadata.map(|v| v.to_string()),
        deleted_at: deleted_at.map(|t| t.timestamp_millis()),
    };
    artstore_redis::events::publish(redis, &event, EVENT_STREAM_MAXLEN).await?;
    Ok(())
}

/// Register a newly uploaded file. `retention_days` of 0 means `PERMANENT`
/// with no TTL; anything else is `TEMPORARY` with `ttl_expires_at` set
/// `retention_days` out from now.
pub async fn register(
    pool: &PgPool,
    redis: &mut ConnectionManager,
    input: RegisterInput,
) -> Result<FileRecord, AdminError> {
    let file_id = input.file_id;
    let (retention_policy, ttl_expires_at) = if input.retention_days > 0 {
        ("TEMPORARY", Some(Utc::now() + Duration::days(input.retention_days as i64)))
    } else {
        ("PERMANENT", None)
    };
    let user_metadata = input.user_metadata.unwrap_or_else(|| serde_json::json!({}));

    let record: FileRecord = sqlx::query_as(
        "INSERT INTO files (file_id, original_filename, storage_filename, file_size, checksum_sha256, content_type,
                             description, retention_policy, ttl_expires_at, ttl_days, storage_element_id, storage_path,
                             uploaded_by, upload_source_ip, user_metadata)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
         RETURNING file_id, original_filename, storage_filename, file_size, checksum_sha256, content_type, description,
                   retention_policy, ttl_expires_at, ttl_days, finalized_at, storage_element_id, storage_path,
                   compressed, compression_algorithm, original_size, uploaded_by, upload_source_ip, user_metadata",
    )
    .bind(file_id)
    .bind(&input.original_filename)
    .bind(&input.storage_filename)
    .bind(input.file_size)
    .bind(&input.checksum_sha256)
    .bind(&input.content_type)
    .bind(&input.description)
    .bind(retention_policy)
    .bind(ttl_expires_at)
    .bind(if input.retention_days > 0 { Some(input.retention_days) } else { None })
    .bind(input.storage_element_id)
    .bind(&input.storage_path)
    .bind(&input.uploaded_by)
    .bind(&input.upload_source_ip)
    .bind(&user_metadata)
    .fetch_one(pool)
    .await?;

    let event_payload = serde_json::to_value(&record).unwrap_or(user_metadata);
    emit(redis, "file:created", file_id, input.storage_element_id, Some(event_payload), None).await?;
    Ok(record)
}

/// Flip `TEMPORARY -> PERMANENT` and clear the TTL. The reverse direction
/// is forbidden (spec §3 invariant).
pub async fn finalize(pool: &PgPool, redis: &mut ConnectionManager, file_id: Uuid) -> Result<FileRecord, AdminError> {
    let record: FileRecord = sqlx::query_as(
        "UPDATE files SET retention_policy = 'PERMANENT', ttl_expires_at = NULL, ttl_days = NULL,
                           finalized_at = now(), updated_at = now()
         WHERE file_id = $1 AND retention_policy = 'TEMPORARY'
         RETURNING file_id, original_filename, storage_filename, file_size, checksum_sha256, content_type, description,
                   retention_policy, ttl_expires_at, ttl_days, finalized_at, storage_element_id, storage_path,
                   compressed, compression_algorithm, original_size, uploaded_by, upload_source_ip, user_metadata",
    )
    .bind(file_id)
    .fetch_one(pool)
    .await?;

    let event_payload = serde_json::to_value(&record).ok();
    emit(redis, "file:updated", file_id, record.storage_element_id, event_payload, None).await?;
    Ok(record)
}

/// Soft-delete a file record, stamping `deleted_at` + `deletion_reason`.
/// Physical bytes cleanup remains the garbage collector's concern.
pub async fn soft_delete(
    pool: &PgPool,
    redis: &mut ConnectionManager,
    file_id: Uuid,
    reason: &str,
) -> Result<(), AdminError> {
    let storage_element_id: Uuid = sqlx::query_scalar(
        "UPDATE files SET deleted_at = now(), deletion_reason = $1, updated_at = now()
         WHERE file_id = $2
         RETURNING storage_element_id",
    )
    .bind(reason)
    .bind(file_id)
    .fetch_one(pool)
    .await?;

    emit(redis, "file:deleted", file_id, storage_element_id, None, Some(Utc::now())).await?;
    Ok(())
}

/// Fetch one file record by ID.
pub async fn get(pool: &PgPool, file_id: Uuid) -> Result<FileRecord, AdminError> {
    let record = sqlx::query_as(
        "SELECT file_id, original_filename, storage_filename, file_size, checksum_sha256, content_type, description,
                retention_policy, ttl_expires_at, ttl_days, finalized_at, storage_element_id, storage_path,
                compressed, compression_algorithm, original_size, uploaded_by, upload_source_ip, user_metadata
         FROM files WHERE file_id = $1 AND deleted_at IS NULL",
    )
    .bind(file_id)
    .fetch_one(pool)
    .await?;
    Ok(record)
}
