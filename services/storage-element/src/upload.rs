//! The atomic write protocol (spec §4.1), steps 1-9, plus rollback.
//!
//! Grounded step-by-step on
//! `original_source/storage-element/app/core/atomic_write.py`: WAL-begin
//! before any filesystem side effect, temp-file-then-fsync-then-rename for
//! both the data file and the attr.json sidecar, and a terminal WAL status
//! written on every exit path.

use std::path::PathBuf;
use std::time::Instant;

use artstore_attrfile::AttrFile;
use artstore_wal::{OperationType, Wal};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::cache_db::{CacheDb, CacheRow};
use crate::config::StorageElementConfig;
use crate::error::ServiceError;
use crate::naming::{hierarchical_dir, storage_filename};

/// Declared metadata accompanying an upload request.
pub struct UploadRequest {
    /// Original client-supplied filename.
    pub original_filename: String,
    /// Declared or sniffed MIME type.
    pub content_type: String,
    /// Identity of the uploading principal.
    pub uploader_id: String,
    /// Display name of the uploading principal.
    pub uploader_username: String,
    /// Optional free-text description.
    pub description: Option<String>,
}

/// Outcome of a successful upload.
pub struct UploadResult {
    /// Newly assigned file identity.
    pub file_id: Uuid,
    /// Name written on disk.
    pub storage_filename: String,
    /// Byte length written.
    pub file_size: u64,
    /// Lowercase hex SHA-256 over the byte stream.
    pub checksum: String,
    /// Path relative to `base_path`, needed by callers registering the file
    /// with the admin file registry.
    pub storage_path: String,
}

/// Run the full atomic write protocol over `body`, a chunked byte stream.
///
/// Takes the WAL, cache index and config directly rather than a full
/// `AppState` so the core protocol can be exercised without a live Redis
/// connection; updating the element's running totals is the caller's job
/// once this returns `Ok`. Registering the result (and publishing
/// `file:created`) with admin-module happens one layer up, in the ingester.
pub async fn upload(
    wal: &dyn Wal,
    cache_db: &CacheDb,
    config: &StorageElementConfig,
    mut body: impl Stream<Item = Result<Bytes, ServiceError>> + Unpin,
    request: UploadRequest,
) -> Result<UploadResult, ServiceError> {
    let start = Instant::now();
    let file_id = Uuid::new_v4();
    let now = Utc::now();

    // Step 1: assign file_id + storage_filename.
    let filename = storage_filename(&request.original_filename, &request.uploader_id, now);
    // Step 2: hierarchical directory.
    let rel_dir = hierarchical_dir(now);
    let abs_dir = PathBuf::from(&config.base_path).join(&rel_dir);
    tokio::fs::create_dir_all(&abs_dir).await?;

    let storage_path = format!("{rel_dir}/{filename}");
    let attr_path = format!("{rel_dir}/{filename}.attr.json");
    let abs_data_path = PathBuf::from(&config.base_path).join(&storage_path);
    let abs_attr_path = PathBuf::from(&config.base_path).join(&attr_path);
    let tmp_data_path = abs_dir.join(format!("{filename}.{}.tmp", &Uuid::new_v4().simple().to_string()[..8]));
    let tmp_attr_path = abs_dir.join(format!("{filename}.attr.{}.tmp", &Uuid::new_v4().simple().to_string()[..8]));

    // Step 3: WAL PENDING, then IN_PROGRESS.
    let compensation = serde_json::json!({
        "delete_data_file": abs_data_path.to_string_lossy(),
        "delete_attr_file": abs_attr_path.to_string_lossy(),
    });
    let payload = serde_json::json!({
        "file_id": file_id,
        "storage_path": storage_path,
        "attr_path": attr_path,
    });
    let wal_entry = wal.begin(OperationType::Upload, payload, compensation, None).await?;
    wal.mark_in_progress(wal_entry.transaction_id).await?;

    let result = write_and_finalize(
        cache_db,
        config,
        &tmp_data_path,
        &abs_data_path,
        &tmp_attr_path,
        &abs_attr_path,
        &storage_path,
        &attr_path,
        file_id,
        &filename,
        &request,
        now,
        &mut body,
    )
    .await;

    match result {
        Ok(outcome) => {
            let duration_ms = start.elapsed().as_millis() as i64;
            wal.commit(wal_entry.transaction_id, duration_ms).await?;
            Ok(outcome)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp_data_path).await;
            let _ = tokio::fs::remove_file(&tmp_attr_path).await;
            let _ = tokio::fs::remove_file(&abs_data_path).await;
            let _ = tokio::fs::remove_file(&abs_attr_path).await;
            wal.fail(wal_entry.transaction_id, e.to_string()).await?;
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn write_and_finalize(
    cache_db: &CacheDb,
    config: &StorageElementConfig,
    tmp_data_path: &PathBuf,
    abs_data_path: &PathBuf,
    tmp_attr_path: &PathBuf,
    abs_attr_path: &PathBuf,
    storage_path: &str,
    attr_path: &str,
    file_id: Uuid,
    filename: &str,
    request: &UploadRequest,
    now: chrono::DateTime<Utc>,
    body: &mut (impl Stream<Item = Result<Bytes, ServiceError>> + Unpin),
) -> Result<UploadResult, ServiceError> {
    // Step 4: stream bytes into a temp file, hashing incrementally.
    let mut file = tokio::fs::File::create(tmp_data_path).await?;
    let mut hasher = Sha256::new();
    let mut total: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        if total + chunk.len() as u64 > config.max_upload_bytes {
            return Err(ServiceError::Validation(format!(
                "upload exceeds max size of {} bytes",
                config.max_upload_bytes
            )));
        }
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    let checksum = hex::encode(hasher.finalize());

    // Step 5: atomic rename of the data file.
    tokio::fs::rename(tmp_data_path, abs_data_path).await?;

    // Step 6: build + atomically write the attr.json sidecar.
    let attrs = AttrFile {
        schema_version: artstore_attrfile::CURRENT_SCHEMA_VERSION.to_string(),
        file_id,
        original_filename: request.original_filename.clone(),
        storage_filename: filename.to_string(),
        file_size: total,
        content_type: request.content_type.clone(),
        created_at: now,
        updated_at: now,
        created_by_id: request.uploader_id.clone(),
        created_by_username: request.uploader_username.clone(),
        created_by_fullname: None,
        description: request.description.clone(),
        version: None,
        storage_path: storage_path.to_string(),
        checksum: checksum.clone(),
        compressed: false,
        compression_algorithm: None,
        original_size: None,
        tags: Vec::new(),
        metadata: Default::default(),
        custom_attributes: Default::default(),
    };
    let attr_bytes = attrs.to_json_bytes()?;

    let mut attr_file = tokio::fs::File::create(tmp_attr_path).await?;
    attr_file.write_all(&attr_bytes).await?;
    attr_file.flush().await?;
    attr_file.sync_all().await?;
    drop(attr_file);
    tokio::fs::rename(tmp_attr_path, abs_attr_path).await?;

    // Step 7: upsert the local cache index row.
    cache_db
        .upsert(CacheRow {
            file_id,
            storage_path: storage_path.to_string(),
            attr_path: attr_path.to_string(),
            file_size: total,
            checksum: checksum.clone(),
            deleted: false,
            indexed_at: Utc::now(),
        })
        .await?;

    Ok(UploadResult {
        file_id,
        storage_filename: filename.to_string(),
        file_size: total,
        checksum,
        storage_path: storage_path.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use artstore_wal::InMemoryWal;
    use futures::stream;

    struct Fixture {
        wal: InMemoryWal,
        cache_db: CacheDb,
        config: StorageElementConfig,
        _cache_dir: tempfile::TempDir,
    }

    async fn fixture(base_path: &std::path::Path) -> Fixture {
        let cache_dir = tempfile::tempdir().unwrap();
        let cache_db =
            crate::cache_db::CacheDb::open(cache_dir.path().join("index.db")).await.unwrap();
        let config = StorageElementConfig {
            element_id: "se-test".into(),
            base_path: base_path.to_string_lossy().to_string(),
            capacity_bytes: 10 * 1024 * 1024 * 1024,
            priority: 10,
            initial_mode: "RW".into(),
            bind_addr: "127.0.0.1:0".into(),
            redis_url: "redis://127.0.0.1:0".into(),
            jwt_public_key: String::new(),
            health_report_interval_secs: 10,
            max_upload_bytes: 1024 * 1024,
        };
        Fixture { wal: InMemoryWal::new(), cache_db, config, _cache_dir: cache_dir }
    }

    #[tokio::test]
    async fn uploads_write_data_and_attr_files() {
        let base = tempfile::tempdir().unwrap();
        let fx = fixture(base.path()).await;

        let body = stream::iter(vec![Ok(Bytes::from_static(b"hello world"))]);
        let request = UploadRequest {
            original_filename: "hello.txt".into(),
            content_type: "text/plain".into(),
            uploader_id: "alice".into(),
            uploader_username: "alice".into(),
            description: None,
        };

        let result = upload(&fx.wal, &fx.cache_db, &fx.config, body, request).await.unwrap();
        assert_eq!(result.file_size, 11);

        let row = fx.cache_db.get(result.file_id).await.unwrap().unwrap();
        let data =
            tokio::fs::read(std::path::Path::new(&fx.config.base_path).join(&row.storage_path))
                .await
                .unwrap();
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_and_rolled_back() {
        let base = tempfile::tempdir().unwrap();
        let mut fx = fixture(base.path()).await;
        fx.config.max_upload_bytes = 4;

        let body = stream::iter(vec![Ok(Bytes::from_static(b"way too large"))]);
        let request = UploadRequest {
            original_filename: "big.txt".into(),
            content_type: "text/plain".into(),
            uploader_id: "bob".into(),
            uploader_username: "bob".into(),
            description: None,
        };

        let err = upload(&fx.wal, &fx.cache_db, &fx.config, body, request).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
