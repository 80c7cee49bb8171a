//! The read-side search row and its CRUD against Postgres (spec §3
//! SearchDocument supplement): a denormalized mirror of `File` kept in sync
//! by the file-events consumer, queried via full-text search and used to
//! resolve a file's current storage-element for download redirection.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::QueryError;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SearchDocument {
    pub file_id: Uuid,
    pub original_filename: String,
    pub storage_filename: String,
    pub file_size: i64,
    pub checksum_sha256: String,
    pub content_type: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub retention_policy: String,
    pub storage_element_id: Uuid,
    pub storage_element_api_url: Option<String>,
    pub storage_path: String,
    pub uploaded_by: String,
    pub user_metadata: Value,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Everything a `file:created`/`file:updated` event's metadata payload
/// carries, mirroring what admin-module's `FileRecord` publishes.
#[derive(Debug, serde::Deserialize)]
pub struct EventMetadata {
    pub original_filename: String,
    pub storage_filename: String,
    pub file_size: i64,
    pub checksum_sha256: String,
    pub content_type: String,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub retention_policy: String,
    pub storage_path: String,
    pub uploaded_by: String,
    #[serde(default)]
    pub user_metadata: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_metadata_deserializes_admin_file_record_shape() {
        let raw = serde_json::json!({
            "file_id": "00000000-0000-0000-0000-000000000001",
            "original_filename": "report.pdf",
            "storage_filename": "a1b2c3.pdf",
            "file_size": 2048,
            "checksum_sha256": "deadbeef",
            "content_type": "application/pdf",
            "description": null,
            "retention_policy": "PERMANENT",
            "ttl_expires_at": null,
            "storage_element_id": "00000000-0000-0000-0000-000000000002",
            "storage_path": "2026/07/27/10/a1b2c3.pdf",
            "uploaded_by": "alice",
            "user_metadata": {"project": "apollo"}
        })
        .to_string();

        let metadata: EventMetadata = serde_json::from_str(&raw).expect("extra FileRecord fields are ignored");
        assert_eq!(metadata.original_filename, "report.pdf");
        assert!(metadata.tags.is_empty());
        assert_eq!(metadata.user_metadata["project"], "apollo");
    }
}

/// Insert or refresh a search row. Idempotent: re-applying the same event
/// (e.g. after a crash-before-ack redelivery) leaves the row unchanged.
pub async fn upsert(
    pool: &PgPool,
    file_id: Uuid,
    storage_element_id: Uuid,
    storage_element_api_url: Option<&str>,
    metadata: EventMetadata,
) -> Result<(), QueryError> {
    sqlx::query(
        r#"
        INSERT INTO search_documents
            (file_id, original_filename, storage_filename, file_size, checksum_sha256, content_type,
             description, tags, retention_policy, storage_element_id, storage_element_api_url, storage_path,
             uploaded_by, user_metadata, deleted_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NULL, now())
        ON CONFLICT (file_id) DO UPDATE SET
            original_filename = EXCLUDED.original_filename,
            storage_filename = EXCLUDED.storage_filename,
            file_size = EXCLUDED.file_size,
            checksum_sha256 = EXCLUDED.checksum_sha256,
            content_type = EXCLUDED.content_type,
            description = EXCLUDED.description,
            tags = EXCLUDED.tags,
            retention_policy = EXCLUDED.retention_policy,
            storage_element_id = EXCLUDED.storage_element_id,
            storage_element_api_url = EXCLUDED.storage_element_api_url,
            storage_path = EXCLUDED.storage_path,
            uploaded_by = EXCLUDED.uploaded_by,
            user_metadata = EXCLUDED.user_metadata,
            deleted_at = NULL,
            updated_at = now()
        "#,
    )
    .bind(file_id)
    .bind(&metadata.original_filename)
    .bind(&metadata.storage_filename)
    .bind(metadata.file_size)
    .bind(&metadata.checksum_sha256)
    .bind(&metadata.content_type)
    .bind(&metadata.description)
    .bind(&metadata.tags)
    .bind(&metadata.retention_policy)
    .bind(storage_element_id)
    .bind(storage_element_api_url)
    .bind(&metadata.storage_path)
    .bind(metadata.uploaded_by)
    .bind(&metadata.user_metadata)
    .execute(pool)
    .await?;
    Ok(())
}

/// Soft-delete is idempotent: stamping `deleted_at` twice leaves the row in
/// the same observable state (spec §5's "tolerate out-of-order delete-vs-
/// update within a small window").
pub async fn mark_deleted(pool: &PgPool, file_id: Uuid, deleted_at: DateTime<Utc>) -> Result<(), QueryError> {
    sqlx::query("UPDATE search_documents SET deleted_at = $1, updated_at = now() WHERE file_id = $2")
        .bind(deleted_at)
        .bind(file_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Fetch one document, including soft-deleted rows (callers decide whether
/// to treat `deleted_at.is_some()` as a 404).
pub async fn get(pool: &PgPool, file_id: Uuid) -> Result<SearchDocument, QueryError> {
    let doc = sqlx::query_as::<_, SearchDocument>(
        "SELECT file_id, original_filename, storage_filename, file_size, checksum_sha256, content_type,
                description, tags, retention_policy, storage_element_id, storage_element_api_url, storage_path,
                uploaded_by, user_metadata, deleted_at
         FROM search_documents WHERE file_id = $1",
    )
    .bind(file_id)
    .fetch_one(pool)
    .await?;
    Ok(doc)
}

/// Full-text search over non-deleted documents, ranked by relevance.
pub async fn search(pool: &PgPool, query: &str, limit: i64) -> Result<Vec<SearchDocument>, QueryError> {
    let docs = sqlx::query_as::<_, SearchDocument>(
        "SELECT file_id, original_filename, storage_filename, file_size, checksum_sha256, content_type,
                description, tags, retention_policy, storage_element_id, storage_element_api_url, storage_path,
                uploaded_by, user_metadata, deleted_at
         FROM search_documents
         WHERE deleted_at IS NULL AND search_vector @@ websearch_to_tsquery('english', $1)
         ORDER BY ts_rank(search_vector, websearch_to_tsquery('english', $1)) DESC
         LIMIT $2",
    )
    .bind(query)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(docs)
}

/// Has this stream entry already been applied? Backing idempotency key for
/// at-least-once delivery (spec §4.5: "keyed by `file_id + event_type +
/// stream_id`").
pub async fn already_processed(pool: &PgPool, stream_id: &str) -> Result<bool, QueryError> {
    let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM processed_events WHERE stream_id = $1")
        .bind(stream_id)
        .fetch_optional(pool)
        .await?;
    Ok(exists.is_some())
}

pub async fn mark_processed(pool: &PgPool, stream_id: &str, file_id: Uuid, event_type: &str) -> Result<(), QueryError> {
    sqlx::query(
        "INSERT INTO processed_events (stream_id, file_id, event_type) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
    )
    .bind(stream_id)
    .bind(file_id)
    .bind(event_type)
    .execute(pool)
    .await?;
    Ok(())
}
