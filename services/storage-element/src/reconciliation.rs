//! Cache-vs-truth reconciliation (spec §4.1 "Cache-vs-truth
//! reconciliation"): the local cache index is a convenience lookup over
//! attr.json files and can drift from them (external copy, restore). Three
//! operations, mutually exclusive via [`ReconciliationLock`] since running
//! a rebuild concurrently with another would race on the same rows.

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};

use crate::cache_db::{CacheDb, CacheRow};
use crate::error::ServiceError;

/// Result of a dry-run consistency check.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ConsistencyReport {
    /// Cache rows whose attr file no longer exists on disk.
    pub orphan_cache: u64,
    /// Attr files on disk with no corresponding cache row.
    pub orphan_attr: u64,
    /// Soft-deleted cache rows old enough to be cleaned up.
    pub expired_cache: u64,
    /// `(orphan_cache + orphan_attr) / total_examined * 100`, rounded.
    pub inconsistency_pct: f64,
}

/// The three reconciliation operations, in descending priority. A lower
/// u8 wins when more than one is requested concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Priority {
    Full = 0,
    Incremental = 1,
    ExpiredCleanup = 2,
}

/// Exclusive lock across the three reconciliation operations on one
/// storage-element, honoring the `full > incremental > expired-cleanup`
/// priority: a lower-priority operation already running yields (returns
/// `Busy`) to a higher-priority one trying to start, rather than queuing
/// behind it.
#[derive(Default)]
pub struct ReconciliationLock {
    running: AtomicU8,
}

const IDLE: u8 = 255;

/// Returned when a reconciliation operation could not acquire the lock.
#[derive(Debug)]
pub struct Busy;

struct Guard<'a> {
    lock: &'a ReconciliationLock,
    priority: u8,
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        // Only clear the flag if nothing else has taken it over since.
        let _ = self.lock.running.compare_exchange(
            self.priority,
            IDLE,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

impl ReconciliationLock {
    fn acquire(&self, priority: Priority) -> Result<Guard<'_>, Busy> {
        let current = self.running.load(Ordering::SeqCst);
        if current != IDLE && current <= priority as u8 {
            return Err(Busy);
        }
        self.running.store(priority as u8, Ordering::SeqCst);
        Ok(Guard { lock: self, priority: priority as u8 })
    }
}

/// Walk the hierarchical `YYYY/MM/DD/HH` tree under `base_path` collecting
/// every `*.attr.json` path, relative to `base_path`.
async fn scan_attr_tree(base_path: &str) -> Result<Vec<String>, ServiceError> {
    let base = Path::new(base_path).to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<Vec<String>> {
        let mut found = Vec::new();
        let mut stack = vec![base.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(e) => e,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.to_string_lossy().ends_with(".attr.json") {
                    if let Ok(rel) = path.strip_prefix(&base) {
                        found.push(rel.to_string_lossy().replace('\\', "/"));
                    }
                }
            }
        }
        Ok(found)
    })
    .await
    .map_err(|e| ServiceError::Transient(e.to_string()))?
    .map_err(ServiceError::from)
}

/// Dry-run: scan the attr tree and the cache, reporting drift without
/// changing anything.
pub async fn consistency_check(
    lock: &ReconciliationLock,
    cache_db: &CacheDb,
    base_path: &str,
    expired_before: DateTime<Utc>,
) -> Result<ConsistencyReport, ServiceError> {
    let _guard = lock.acquire(Priority::Incremental).map_err(|_| {
        ServiceError::Transient("reconciliation busy with a higher-priority operation".into())
    })?;

    let on_disk = scan_attr_tree(base_path).await?;
    let disk_set: std::collections::HashSet<_> = on_disk.iter().cloned().collect();
    let cached_rows = cache_db.list_all().await?;
    let cached_set: std::collections::HashSet<_> = cached_rows.iter().map(|r| r.attr_path.clone()).collect();

    let orphan_cache = cached_rows.iter().filter(|r| !disk_set.contains(&r.attr_path)).count() as u64;
    let orphan_attr = on_disk.iter().filter(|p| !cached_set.contains(*p)).count() as u64;
    let expired_cache =
        cached_rows.iter().filter(|r| r.deleted && r.indexed_at < expired_before).count() as u64;

    let total = (cached_rows.len() + on_disk.len()).max(1) as f64;
    let inconsistency_pct = ((orphan_cache + orphan_attr) as f64 / total) * 100.0;

    Ok(ConsistencyReport { orphan_cache, orphan_attr, expired_cache, inconsistency_pct })
}

/// Insert cache rows for attr files present on disk but missing from the
/// cache; never touches rows that already exist.
pub async fn incremental_rebuild(
    lock: &ReconciliationLock,
    cache_db: &CacheDb,
    base_path: &str,
) -> Result<u64, ServiceError> {
    let _guard = lock
        .acquire(Priority::Incremental)
        .map_err(|_| ServiceError::Transient("reconciliation busy with a full rebuild".into()))?;

    let on_disk = scan_attr_tree(base_path).await?;
    let known = cache_db.all_attr_paths().await?.into_iter().collect::<std::collections::HashSet<_>>();

    let mut inserted = 0u64;
    for attr_path in on_disk {
        if known.contains(&attr_path) {
            continue;
        }
        if let Some(row) = load_row_from_attr(base_path, &attr_path).await? {
            cache_db.upsert(row).await?;
            inserted += 1;
        }
    }
    Ok(inserted)
}

/// Truncate the cache and rebuild it entirely from attr files on disk.
pub async fn full_rebuild(
    lock: &ReconciliationLock,
    cache_db: &CacheDb,
    base_path: &str,
) -> Result<u64, ServiceError> {
    let _guard = lock
        .acquire(Priority::Full)
        .map_err(|_| ServiceError::Transient("another full rebuild is already running".into()))?;

    cache_db.truncate().await?;
    let on_disk = scan_attr_tree(base_path).await?;
    let mut inserted = 0u64;
    for attr_path in on_disk {
        if let Some(row) = load_row_from_attr(base_path, &attr_path).await? {
            cache_db.upsert(row).await?;
            inserted += 1;
        }
    }
    Ok(inserted)
}

/// Remove soft-deleted cache rows older than `cutoff`. Lowest priority:
/// yields to an in-flight incremental or full rebuild.
pub async fn cleanup_expired(
    lock: &ReconciliationLock,
    cache_db: &CacheDb,
    cutoff: DateTime<Utc>,
) -> Result<u64, ServiceError> {
    let _guard = lock
        .acquire(Priority::ExpiredCleanup)
        .map_err(|_| ServiceError::Transient("reconciliation busy with a higher-priority operation".into()))?;
    cache_db.remove_expired(cutoff).await
}

async fn load_row_from_attr(base_path: &str, attr_path: &str) -> Result<Option<CacheRow>, ServiceError> {
    let abs = Path::new(base_path).join(attr_path);
    let bytes = match tokio::fs::read(&abs).await {
        Ok(b) => b,
        Err(_) => return Ok(None),
    };
    let attrs = match artstore_attrfile::AttrFile::parse(&bytes) {
        Ok(a) => a,
        Err(_) => return Ok(None),
    };
    Ok(Some(CacheRow {
        file_id: attrs.file_id,
        storage_path: attrs.storage_path,
        attr_path: attr_path.to_string(),
        file_size: attrs.file_size,
        checksum: attrs.checksum,
        deleted: false,
        indexed_at: Utc::now(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_attr(base: &Path, rel_dir: &str, file_id: uuid::Uuid, name: &str) -> String {
        let dir = base.join(rel_dir);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let attrs = artstore_attrfile::AttrFile {
            schema_version: artstore_attrfile::CURRENT_SCHEMA_VERSION.to_string(),
            file_id,
            original_filename: name.to_string(),
            storage_filename: name.to_string(),
            file_size: 4,
            content_type: "text/plain".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            created_by_id: "alice".into(),
            created_by_username: "alice".into(),
            created_by_fullname: None,
            description: None,
            version: None,
            storage_path: format!("{rel_dir}/{name}"),
            checksum: "deadbeef".into(),
            compressed: false,
            compression_algorithm: None,
            original_size: None,
            tags: Vec::new(),
            metadata: Default::default(),
            custom_attributes: Default::default(),
        };
        let attr_path = format!("{rel_dir}/{name}.attr.json");
        tokio::fs::write(base.join(&attr_path), attrs.to_json_bytes().unwrap()).await.unwrap();
        tokio::fs::write(base.join(rel_dir).join(name), b"data").await.unwrap();
        attr_path
    }

    async fn cache_db(dir: &Path) -> CacheDb {
        CacheDb::open(dir.join("index.db")).await.unwrap()
    }

    #[tokio::test]
    async fn full_rebuild_finds_every_attr_file() {
        let base = tempfile::tempdir().unwrap();
        write_attr(base.path(), "2026/07/27/10", uuid::Uuid::new_v4(), "a.bin").await;
        write_attr(base.path(), "2026/07/27/11", uuid::Uuid::new_v4(), "b.bin").await;

        let db = cache_db(base.path()).await;
        let lock = ReconciliationLock::default();
        let inserted = full_rebuild(&lock, &db, &base.path().to_string_lossy()).await.unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(db.list_active().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn consistency_check_reports_orphan_attr() {
        let base = tempfile::tempdir().unwrap();
        write_attr(base.path(), "2026/07/27/10", uuid::Uuid::new_v4(), "a.bin").await;

        let db = cache_db(base.path()).await;
        let lock = ReconciliationLock::default();
        let report =
            consistency_check(&lock, &db, &base.path().to_string_lossy(), Utc::now()).await.unwrap();
        assert_eq!(report.orphan_attr, 1);
        assert_eq!(report.orphan_cache, 0);
    }

    #[tokio::test]
    async fn incremental_rebuild_only_adds_missing_rows() {
        let base = tempfile::tempdir().unwrap();
        let id_a = uuid::Uuid::new_v4();
        write_attr(base.path(), "2026/07/27/10", id_a, "a.bin").await;
        write_attr(base.path(), "2026/07/27/10", uuid::Uuid::new_v4(), "b.bin").await;

        let db = cache_db(base.path()).await;
        db.upsert(CacheRow {
            file_id: id_a,
            storage_path: "2026/07/27/10/a.bin".into(),
            attr_path: "2026/07/27/10/a.bin.attr.json".into(),
            file_size: 4,
            checksum: "deadbeef".into(),
            deleted: false,
            indexed_at: Utc::now(),
        })
        .await
        .unwrap();

        let lock = ReconciliationLock::default();
        let inserted = incremental_rebuild(&lock, &db, &base.path().to_string_lossy()).await.unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(db.list_active().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn higher_priority_rebuild_rejects_concurrent_lower_priority() {
        let lock = ReconciliationLock::default();
        let _guard = lock.acquire(Priority::Full).unwrap();
        assert!(lock.acquire(Priority::Incremental).is_err());
        assert!(lock.acquire(Priority::ExpiredCleanup).is_err());
    }
}
