//! Crash-restart recovery: scan non-terminal WAL entries left over from a
//! process that died mid-operation and resolve each one (spec §4.1
//! "Crash recovery"), before the server starts accepting requests.
//!
//! Grounded on `artstore_wal::decide_recovery_action` for the decision and
//! on `original_source/storage-element/app/core/atomic_write.py`'s
//! `compensation_data` convention for what "running compensation" means:
//! delete whichever half of the upload got written.

use std::path::Path;

use artstore_wal::{OperationType, RecoveryAction, Wal, WalStatus};
use tracing::{info, warn};

use crate::config::StorageElementConfig;

/// Outcome of one entry's recovery, for the startup log line.
#[derive(Debug)]
pub struct RecoveryReport {
    /// How many non-terminal entries were found at all.
    pub scanned: usize,
    /// How many were promoted to `Committed`.
    pub committed: usize,
    /// How many had an orphaned data file deleted.
    pub orphans_deleted: usize,
    /// How many ran compensation and were marked `RolledBack`.
    pub rolled_back: usize,
}

/// Scan every non-terminal WAL entry and resolve it. Only `Upload` entries
/// carry on-disk artifacts the way `decide_recovery_action` expects;
/// entries for other operation types always fall back to compensation.
pub async fn recover(wal: &dyn Wal, config: &StorageElementConfig) -> Result<RecoveryReport, crate::error::ServiceError> {
    let pending = wal.non_terminal().await?;
    let mut report = RecoveryReport { scanned: pending.len(), committed: 0, orphans_deleted: 0, rolled_back: 0 };

    for entry in pending {
        warn!(transaction_id = %entry.transaction_id, status = ?entry.status, "resuming non-terminal WAL entry at startup");

        if entry.operation_type != OperationType::Upload {
            run_compensation(&entry.compensation_data).await;
            wal.roll_back(entry.transaction_id).await?;
            report.rolled_back += 1;
            continue;
        }

        let storage_path = entry.payload.get("storage_path").and_then(|v| v.as_str());
        let attr_path = entry.payload.get("attr_path").and_then(|v| v.as_str());

        let (data_exists, attr_valid) = match (storage_path, attr_path) {
            (Some(sp), Some(ap)) => {
                let base = Path::new(&config.base_path);
                let data_exists = tokio::fs::metadata(base.join(sp)).await.is_ok();
                let attr_valid = match tokio::fs::read(base.join(ap)).await {
                    Ok(bytes) => artstore_attrfile::AttrFile::parse(&bytes).is_ok(),
                    Err(_) => false,
                };
                (data_exists, attr_valid)
            }
            _ => (false, false),
        };

        match artstore_wal::decide_recovery_action(data_exists, attr_valid) {
            RecoveryAction::MarkCommitted => {
                wal.commit(entry.transaction_id, 0).await?;
                report.committed += 1;
            }
            RecoveryAction::DeleteOrphanDataFile => {
                if let Some(sp) = storage_path {
                    let _ = tokio::fs::remove_file(Path::new(&config.base_path).join(sp)).await;
                }
                wal.roll_back(entry.transaction_id).await?;
                report.orphans_deleted += 1;
            }
            RecoveryAction::RunCompensation => {
                run_compensation(&entry.compensation_data).await;
                wal.roll_back(entry.transaction_id).await?;
                report.rolled_back += 1;
            }
        }
    }

    if entries_remain_in_progress(wal).await? {
        warn!("entries remain non-terminal after a recovery pass; investigate before serving traffic");
    }

    info!(
        scanned = report.scanned,
        committed = report.committed,
        orphans_deleted = report.orphans_deleted,
        rolled_back = report.rolled_back,
        "crash recovery complete"
    );
    Ok(report)
}

async fn entries_remain_in_progress(wal: &dyn Wal) -> Result<bool, crate::error::ServiceError> {
    let remaining = wal.non_terminal().await?;
    Ok(remaining.iter().any(|e| e.status == WalStatus::InProgress || e.status == WalStatus::Pending))
}

/// Best-effort filesystem compensation from a WAL entry's
/// `compensation_data`, matching the `delete_data_file` / `delete_attr_file`
/// keys the write protocol records.
async fn run_compensation(compensation_data: &serde_json::Value) {
    if let Some(path) = compensation_data.get("delete_data_file").and_then(|v| v.as_str()) {
        let _ = tokio::fs::remove_file(path).await;
    }
    if let Some(path) = compensation_data.get("delete_attr_file").and_then(|v| v.as_str()) {
        let _ = tokio::fs::remove_file(path).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artstore_wal::InMemoryWal;

    fn config(base_path: &Path) -> StorageElementConfig {
        StorageElementConfig {
            element_id: "se-test".into(),
            base_path: base_path.to_string_lossy().to_string(),
            capacity_bytes: 1024 * 1024 * 1024,
            priority: 10,
            initial_mode: "RW".into(),
            bind_addr: "127.0.0.1:0".into(),
            redis_url: "redis://127.0.0.1:0".into(),
            jwt_public_key: String::new(),
            health_report_interval_secs: 10,
            max_upload_bytes: 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn orphan_data_file_is_deleted_and_rolled_back() {
        let base = tempfile::tempdir().unwrap();
        tokio::fs::write(base.path().join("orphan.bin"), b"partial").await.unwrap();

        let wal = InMemoryWal::new();
        let entry = wal
            .begin(
                OperationType::Upload,
                serde_json::json!({"storage_path": "orphan.bin", "attr_path": "missing.attr.json"}),
                serde_json::json!({}),
                None,
            )
            .await
            .unwrap();
        wal.mark_in_progress(entry.transaction_id).await.unwrap();

        let report = recover(&wal, &config(base.path())).await.unwrap();
        assert_eq!(report.orphans_deleted, 1);
        assert!(tokio::fs::metadata(base.path().join("orphan.bin")).await.is_err());

        let resolved = wal.get(entry.transaction_id).await.unwrap().unwrap();
        assert_eq!(resolved.status, WalStatus::RolledBack);
    }

    #[tokio::test]
    async fn complete_pair_is_marked_committed() {
        let base = tempfile::tempdir().unwrap();
        tokio::fs::write(base.path().join("done.bin"), b"all good").await.unwrap();
        let attrs = artstore_attrfile::AttrFile {
            schema_version: artstore_attrfile::CURRENT_SCHEMA_VERSION.to_string(),
            file_id: uuid::Uuid::new_v4(),
            original_filename: "done.bin".into(),
            storage_filename: "done.bin".into(),
            file_size: 8,
            content_type: "application/octet-stream".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            created_by_id: "alice".into(),
            created_by_username: "alice".into(),
            created_by_fullname: None,
            description: None,
            version: None,
            storage_path: "done.bin".into(),
            checksum: "deadbeef".into(),
            compressed: false,
            compression_algorithm: None,
            original_size: None,
            tags: Vec::new(),
            metadata: Default::default(),
            custom_attributes: Default::default(),
        };
        tokio::fs::write(base.path().join("done.attr.json"), attrs.to_json_bytes().unwrap()).await.unwrap();

        let wal = InMemoryWal::new();
        let entry = wal
            .begin(
                OperationType::Upload,
                serde_json::json!({"storage_path": "done.bin", "attr_path": "done.attr.json"}),
                serde_json::json!({}),
                None,
            )
            .await
            .unwrap();
        wal.mark_in_progress(entry.transaction_id).await.unwrap();

        let report = recover(&wal, &config(base.path())).await.unwrap();
        assert_eq!(report.committed, 1);
        let resolved = wal.get(entry.transaction_id).await.unwrap().unwrap();
        assert_eq!(resolved.status, WalStatus::Committed);
    }

    #[tokio::test]
    async fn missing_artifacts_run_compensation() {
        let base = tempfile::tempdir().unwrap();
        let wal = InMemoryWal::new();
        let entry = wal
            .begin(
                OperationType::Delete,
                serde_json::json!({}),
                serde_json::json!({"delete_attr_file": base.path().join("nope.json").to_string_lossy()}),
                None,
            )
            .await
            .unwrap();
        wal.mark_in_progress(entry.transaction_id).await.unwrap();

        let report = recover(&wal, &config(base.path())).await.unwrap();
        assert_eq!(report.rolled_back, 1);
    }
}
