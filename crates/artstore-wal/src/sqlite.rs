//! SQLite-file-backed [`Wal`], used by the storage-element process.
//!
//! `rusqlite` is synchronous; every call hands the connection to
//! `spawn_blocking` rather than holding an async lock across blocking I/O,
//! mirroring the teacher's own pattern of keeping its file backend's
//! fsync-bearing calls off the async executor.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::{OperationType, Wal, WalEntry, WalError, WalStatus};

fn op_to_str(op: OperationType) -> &'static str {
    match op {
        OperationType::Upload => "UPLOAD",
        OperationType::Delete => "DELETE",
        OperationType::UpdateMetadata => "UPDATE_METADATA",
        OperationType::ModeChange => "MODE_CHANGE",
    }
}

fn op_from_str(s: &str) -> Result<OperationType, WalError> {
    match s {
        "UPLOAD" => Ok(OperationType::Upload),
        "DELETE" => Ok(OperationType::Delete),
        "UPDATE_METADATA" => Ok(OperationType::UpdateMetadata),
        "MODE_CHANGE" => Ok(OperationType::ModeChange),
        other => Err(WalError::Storage(format!("unknown operation_type {other}"))),
    }
}

fn status_to_str(status: WalStatus) -> &'static str {
    match status {
        WalStatus::Pending => "PENDING",
        WalStatus::InProgress => "IN_PROGRESS",
        WalStatus::Committed => "COMMITTED",
        WalStatus::Failed => "FAILED",
        WalStatus::RolledBack => "ROLLED_BACK",
    }
}

fn status_from_str(s: &str) -> Result<WalStatus, WalError> {
    match s {
        "PENDING" => Ok(WalStatus::Pending),
        "IN_PROGRESS" => Ok(WalStatus::InProgress),
        "COMMITTED" => Ok(WalStatus::Committed),
        "FAILED" => Ok(WalStatus::Failed),
        "ROLLED_BACK" => Ok(WalStatus::RolledBack),
        other => Err(WalError::Storage(format!("unknown status {other}"))),
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<WalEntry> {
    let transaction_id: String = row.get("transaction_id")?;
    let operation_type: String = row.get("operation_type")?;
    let status: String = row.get("status")?;
    let payload: String = row.get("payload")?;
    let compensation_data: String = row.get("compensation_data")?;
    let started_at: i64 = row.get("started_at")?;
    let committed_at: Option<i64> = row.get("committed_at")?;
    let saga_id: Option<String> = row.get("saga_id")?;
    let error_message: Option<String> = row.get("error_message")?;
    let duration_ms: Option<i64> = row.get("duration_ms")?;

    Ok(WalEntry {
        transaction_id: Uuid::parse_str(&transaction_id).unwrap_or_default(),
        operation_type: op_from_str(&operation_type).unwrap_or(OperationType::Upload),
        status: status_from_str(&status).unwrap_or(WalStatus::Pending),
        payload: serde_json::from_str(&payload).unwrap_or_default(),
        compensation_data: serde_json::from_str(&compensation_data).unwrap_or_default(),
        started_at: Utc.timestamp_millis_opt(started_at).single().unwrap_or_else(Utc::now),
        committed_at: committed_at.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        saga_id,
        error_message,
        duration_ms,
    })
}

/// SQLite-backed WAL. One instance per storage-element process, pointed at
/// `{base_path}/.cache/wal.db`.
pub struct SqliteWal {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteWal {
    /// Open (creating if necessary) the WAL database at `path`.
    pub async fn open(path: impl AsRef<Path> + Send + 'static) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, WalError> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| WalError::Storage(e.to_string()))?;
            }
            let conn = Connection::open(&path).map_err(|e| WalError::Storage(e.to_string()))?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS wal_entries (
                    transaction_id TEXT PRIMARY KEY,
                    operation_type TEXT NOT NULL,
                    status TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    compensation_data TEXT NOT NULL,
                    started_at INTEGER NOT NULL,
                    committed_at INTEGER,
                    saga_id TEXT,
                    error_message TEXT,
                    duration_ms INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_wal_status ON wal_entries(status);",
            )
            .map_err(|e| WalError::Storage(e.to_string()))?;
            Ok(conn)
        })
        .await
        .map_err(|e| WalError::Storage(e.to_string()))??;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, WalError>
    where
        F: FnOnce(&Connection) -> Result<T, WalError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("wal connection mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| WalError::Storage(e.to_string()))?
    }

    fn load_entry(conn: &Connection, transaction_id: Uuid) -> Result<WalEntry, WalError> {
        conn.query_row(
            "SELECT * FROM wal_entries WHERE transaction_id = ?1",
            params![transaction_id.to_string()],
            row_to_entry,
        )
        .optional()
        .map_err(|e| WalError::Storage(e.to_string()))?
        .ok_or(WalError::NotFound(transaction_id))
    }

    fn apply_transition(
        conn: &Connection,
        transaction_id: Uuid,
        expected: &[WalStatus],
        to: WalStatus,
        error_message: Option<&str>,
        duration_ms: Option<i64>,
    ) -> Result<(), WalError> {
        let entry = Self::load_entry(conn, transaction_id)?;
        if !expected.contains(&entry.status) {
            return Err(WalError::InvalidTransition { transaction_id, from: entry.status, to });
        }
        conn.execute(
            "UPDATE wal_entries SET status = ?1, committed_at = ?2, error_message = ?3, duration_ms = ?4
             WHERE transaction_id = ?5",
            params![
                status_to_str(to),
                Utc::now().timestamp_millis(),
                error_message,
                duration_ms,
                transaction_id.to_string(),
            ],
        )
        .map_err(|e| WalError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Wal for SqliteWal {
    async fn begin(
        &self,
        operation_type: OperationType,
        payload: serde_json::Value,
        compensation_data: serde_json::Value,
        saga_id: Option<String>,
    ) -> Result<WalEntry, WalError> {
        let entry = WalEntry {
            transaction_id: Uuid::new_v4(),
            operation_type,
            status: WalStatus::Pending,
            payload,
            compensation_data,
            started_at: Utc::now(),
            committed_at: None,
            saga_id,
            error_message: None,
            duration_ms: None,
        };
        let to_insert = entry.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO wal_entries
                 (transaction_id, operation_type, status, payload, compensation_data,
                  started_at, committed_at, saga_id, error_message, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, NULL, NULL)",
                params![
                    to_insert.transaction_id.to_string(),
                    op_to_str(to_insert.operation_type),
                    status_to_str(to_insert.status),
                    serde_json::to_string(&to_insert.payload).unwrap_or_default(),
                    serde_json::to_string(&to_insert.compensation_data).unwrap_or_default(),
                    to_insert.started_at.timestamp_millis(),
                    to_insert.saga_id,
                ],
            )
            .map_err(|e| WalError::Storage(e.to_string()))?;
            Ok(())
        })
        .await?;
        Ok(entry)
    }

    async fn mark_in_progress(&self, transaction_id: Uuid) -> Result<(), WalError> {
        self.with_conn(move |conn| {
            Self::apply_transition(
                conn,
                transaction_id,
                &[WalStatus::Pending],
                WalStatus::InProgress,
                None,
                None,
            )
        })
        .await
    }

    async fn commit(&self, transaction_id: Uuid, duration_ms: i64) -> Result<(), WalError> {
        self.with_conn(move |conn| {
            Self::apply_transition(
                conn,
                transaction_id,
                &[WalStatus::InProgress],
                WalStatus::Committed,
                None,
                Some(duration_ms),
            )
        })
        .await
    }

    async fn fail(&self, transaction_id: Uuid, error_message: String) -> Result<(), WalError> {
        self.with_conn(move |conn| {
            Self::apply_transition(
                conn,
                transaction_id,
                &[WalStatus::Pending, WalStatus::InProgress],
                WalStatus::Failed,
                Some(&error_message),
                None,
            )
        })
        .await
    }

    async fn roll_back(&self, transaction_id: Uuid) -> Result<(), WalError> {
        self.with_conn(move |conn| {
            Self::apply_transition(
                conn,
                transaction_id,
                &[WalStatus::Pending, WalStatus::InProgress],
                WalStatus::RolledBack,
                None,
                None,
            )
        })
        .await
    }

    async fn get(&self, transaction_id: Uuid) -> Result<Option<WalEntry>, WalError> {
        self.with_conn(move |conn| match Self::load_entry(conn, transaction_id) {
            Ok(entry) => Ok(Some(entry)),
            Err(WalError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn non_terminal(&self) -> Result<Vec<WalEntry>, WalError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM wal_entries WHERE status IN ('PENDING', 'IN_PROGRESS')
                     ORDER BY started_at ASC",
                )
                .map_err(|e| WalError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], row_to_entry)
                .map_err(|e| WalError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| WalError::Storage(e.to_string()))
        })
        .await
    }

    async fn compact_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, WalError> {
        let cutoff_ms = cutoff.timestamp_millis();
        self.with_conn(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM wal_entries
                     WHERE status IN ('COMMITTED', 'FAILED', 'ROLLED_BACK') AND started_at < ?1",
                    params![cutoff_ms],
                )
                .map_err(|e| WalError::Storage(e.to_string()))?;
            Ok(deleted as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("wal.db");

        let wal = SqliteWal::open(db_path.clone()).await.unwrap();
        let entry = wal
            .begin(OperationType::Upload, serde_json::json!({"a": 1}), serde_json::json!({}), None)
            .await
            .unwrap();
        wal.mark_in_progress(entry.transaction_id).await.unwrap();
        drop(wal);

        let reopened = SqliteWal::open(db_path).await.unwrap();
        let pending = reopened.non_terminal().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].transaction_id, entry.transaction_id);
        assert_eq!(pending[0].status, WalStatus::InProgress);
    }

    #[tokio::test]
    async fn compacts_only_terminal_entries_past_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let wal = SqliteWal::open(dir.path().join("wal.db")).await.unwrap();

        let done = wal
            .begin(OperationType::Delete, serde_json::json!({}), serde_json::json!({}), None)
            .await
            .unwrap();
        wal.mark_in_progress(done.transaction_id).await.unwrap();
        wal.commit(done.transaction_id, 5).await.unwrap();

        let still_open = wal
            .begin(OperationType::Upload, serde_json::json!({}), serde_json::json!({}), None)
            .await
            .unwrap();

        let removed = wal.compact_older_than(Utc::now() + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(wal.get(done.transaction_id).await.unwrap().is_none());
        assert!(wal.get(still_open.transaction_id).await.unwrap().is_some());
    }
}
