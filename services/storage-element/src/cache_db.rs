//! The storage-element's local cache index: a convenience lookup over
//! attr.json files, never a source of truth (spec §4.1 step 7, "Local
//! cache DB" in SPEC_FULL.md §4.1).

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::ServiceError;

/// One row of the cache index, denormalized from a file's attr.json.
#[derive(Debug, Clone)]
pub struct CacheRow {
    /// File identity.
    pub file_id: Uuid,
    /// Path of the data file relative to the element's base path.
    pub storage_path: String,
    /// Path of the attr.json, relative to the element's base path.
    pub attr_path: String,
    /// Size in bytes at last index.
    pub file_size: u64,
    /// SHA-256 checksum at last index.
    pub checksum: String,
    /// Whether the file has been soft-deleted.
    pub deleted: bool,
    /// When this row was last refreshed from the attr file.
    pub indexed_at: DateTime<Utc>,
}

fn row_to_cache_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheRow> {
    let file_id: String = row.get("file_id")?;
    let indexed_at: i64 = row.get("indexed_at")?;
    Ok(CacheRow {
        file_id: Uuid::parse_str(&file_id).unwrap_or_default(),
        storage_path: row.get("storage_path")?,
        attr_path: row.get("attr_path")?,
        file_size: row.get::<_, i64>("file_size")? as u64,
        checksum: row.get("checksum")?,
        deleted: row.get::<_, i64>("deleted")? != 0,
        indexed_at: Utc.timestamp_millis_opt(indexed_at).single().unwrap_or_else(Utc::now),
    })
}

/// A single-file SQLite index at `{base_path}/.cache/index.db`.
pub struct CacheDb {
    conn: Arc<Mutex<Connection>>,
}

impl CacheDb {
    /// Open (creating if necessary) the index database at `path`.
    pub async fn open(path: impl AsRef<Path> + Send + 'static) -> Result<Self, ServiceError> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> rusqlite::Result<Connection> {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let conn = Connection::open(&path)?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS cache_index (
                    file_id TEXT PRIMARY KEY,
                    storage_path TEXT NOT NULL,
                    attr_path TEXT NOT NULL UNIQUE,
                    file_size INTEGER NOT NULL,
                    checksum TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0,
                    indexed_at INTEGER NOT NULL
                );",
            )?;
            Ok(conn)
        })
        .await
        .map_err(|e| ServiceError::Transient(e.to_string()))??;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("cache db mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| ServiceError::Transient(e.to_string()))?
        .map_err(ServiceError::from)
    }

    /// Insert or replace a row, keyed by `file_id`.
    pub async fn upsert(&self, row: CacheRow) -> Result<(), ServiceError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO cache_index (file_id, storage_path, attr_path, file_size, checksum, deleted, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(file_id) DO UPDATE SET
                    storage_path = excluded.storage_path,
                    attr_path = excluded.attr_path,
                    file_size = excluded.file_size,
                    checksum = excluded.checksum,
                    deleted = excluded.deleted,
                    indexed_at = excluded.indexed_at",
                params![
                    row.file_id.to_string(),
                    row.storage_path,
                    row.attr_path,
                    row.file_size as i64,
                    row.checksum,
                    row.deleted as i64,
                    row.indexed_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Mark a row soft-deleted without removing it (so `ListByFilter` can
    /// still distinguish "never existed" from "deleted").
    pub async fn mark_deleted(&self, file_id: Uuid) -> Result<(), ServiceError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE cache_index SET deleted = 1, indexed_at = ?2 WHERE file_id = ?1",
                params![file_id.to_string(), Utc::now().timestamp_millis()],
            )?;
            Ok(())
        })
        .await
    }

    /// Fetch one row by file ID.
    pub async fn get(&self, file_id: Uuid) -> Result<Option<CacheRow>, ServiceError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM cache_index WHERE file_id = ?1",
                params![file_id.to_string()],
                row_to_cache_row,
            )
            .optional()
        })
        .await
    }

    /// All non-deleted rows, for `ListByFilter`.
    pub async fn list_active(&self) -> Result<Vec<CacheRow>, ServiceError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM cache_index WHERE deleted = 0 ORDER BY indexed_at DESC")?;
            let rows = stmt.query_map([], row_to_cache_row)?;
            rows.collect()
        })
        .await
    }

    /// All `attr_path` values currently indexed, for reconciliation.
    pub async fn all_attr_paths(&self) -> Result<Vec<String>, ServiceError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT attr_path FROM cache_index")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
        .await
    }

    /// Every row regardless of `deleted`, for reconciliation's full scan.
    pub async fn list_all(&self) -> Result<Vec<CacheRow>, ServiceError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM cache_index")?;
            let rows = stmt.query_map([], row_to_cache_row)?;
            rows.collect()
        })
        .await
    }

    /// Drop every row — used by a full rebuild before re-inserting from
    /// attr files on disk.
    pub async fn truncate(&self) -> Result<(), ServiceError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM cache_index", [])?;
            Ok(())
        })
        .await
    }

    /// Remove soft-deleted rows indexed before `cutoff` — their attr file
    /// is long gone and their physical bytes are the garbage collector's
    /// concern, not this index's.
    pub async fn remove_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, ServiceError> {
        self.with_conn(move |conn| {
            Ok(conn.execute(
                "DELETE FROM cache_index WHERE deleted = 1 AND indexed_at < ?1",
                params![cutoff.timestamp_millis()],
            )? as u64)
        })
        .await
    }

    /// Remove rows whose `attr_path` is not in `valid_paths` — used by
    /// reconciliation to drop orphaned cache entries.
    pub async fn remove_orphans(&self, valid_paths: Vec<String>) -> Result<u64, ServiceError> {
        self.with_conn(move |conn| {
            let all: Vec<String> = {
                let mut stmt = conn.prepare("SELECT attr_path FROM cache_index")?;
                stmt.query_map([], |row| row.get::<_, String>(0))?.collect::<rusqlite::Result<_>>()?
            };
            let valid: std::collections::HashSet<_> = valid_paths.into_iter().collect();
            let mut removed = 0u64;
            for path in all {
                if !valid.contains(&path) {
                    removed += conn.execute(
                        "DELETE FROM cache_index WHERE attr_path = ?1",
                        params![path],
                    )? as u64;
                }
            }
            Ok(removed)
        })
        .await
    }
}
