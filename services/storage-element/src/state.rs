//! Shared process state, handed to every HTTP handler via axum's `State`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use artstore_redis::registry::PriorityMode;
use artstore_wal::Wal;
use tokio::sync::RwLock;

use crate::cache_db::CacheDb;
use crate::config::StorageElementConfig;
use crate::mode::{ModeHistory, StorageMode};

/// Everything a request handler needs: config, the WAL, the cache index,
/// the JWT validator, and the element's live mode and usage counters.
pub struct AppState {
    /// Static configuration loaded at startup.
    pub config: StorageElementConfig,
    /// Write-ahead log backing the atomic write protocol.
    pub wal: Arc<dyn Wal>,
    /// Local convenience index over attr.json files.
    pub cache_db: Arc<CacheDb>,
    /// Validates inbound bearer tokens.
    pub jwt: Arc<artstore_jwt::KeyManager>,
    /// Current operating mode; read on every request, written only by the
    /// mode-transition endpoint.
    pub mode: RwLock<StorageMode>,
    /// Append-only record of mode transitions.
    pub mode_history: RwLock<ModeHistory>,
    /// Bytes currently occupied, updated only on WAL-COMMITTED transitions.
    pub used_bytes: AtomicU64,
    /// Count of live (non-deleted) files, updated alongside `used_bytes`.
    pub file_count: AtomicU64,
}

impl AppState {
    /// Current capacity thresholds for the element's live mode.
    pub async fn thresholds(&self) -> Option<artstore_capacity::Thresholds> {
        let mode = *self.mode.read().await;
        let threshold_mode = match mode {
            StorageMode::Rw => artstore_capacity::ThresholdMode::Rw,
            StorageMode::Edit => artstore_capacity::ThresholdMode::Edit,
            StorageMode::Ro | StorageMode::Ar => return None,
        };
        Some(artstore_capacity::calculate_adaptive_threshold(
            self.config.capacity_bytes,
            threshold_mode,
        ))
    }

    /// Current capacity status for the element's live mode.
    pub async fn capacity_status(&self) -> artstore_capacity::CapacityStatus {
        let thresholds = self.thresholds().await;
        artstore_capacity::get_capacity_status(
            self.used_bytes.load(Ordering::SeqCst),
            self.config.capacity_bytes,
            thresholds,
        )
    }

    /// Record a successful upload's contribution to the running totals.
    pub fn record_upload(&self, size: u64) {
        self.used_bytes.fetch_add(size, Ordering::SeqCst);
        self.file_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a successful delete's contribution to the running totals.
    pub fn record_delete(&self, size: u64) {
        self.used_bytes.fetch_sub(size.min(self.used_bytes.load(Ordering::SeqCst)), Ordering::SeqCst);
        let current = self.file_count.load(Ordering::SeqCst);
        if current > 0 {
            self.file_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Which priority sorted set this element should belong to right now,
    /// or `None` if it should be absent from both (full or read-only).
    pub async fn priority_membership(&self) -> Option<PriorityMode> {
        let mode = *self.mode.read().await;
        let writable = match mode {
            StorageMode::Rw => Some(PriorityMode::Rw),
            StorageMode::Edit => Some(PriorityMode::Edit),
            StorageMode::Ro | StorageMode::Ar => None,
        }?;
        match self.capacity_status().await {
            artstore_capacity::CapacityStatus::Full => None,
            _ => Some(writable),
        }
    }
}
