//! In-memory [`Wal`] backend, used in unit tests across the other crates
//! and services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::{OperationType, Wal, WalEntry, WalError, WalStatus};

/// A `DashMap`-backed WAL with no durability — exists for tests and for
/// anything exercising the WAL contract without a filesystem.
#[derive(Default)]
pub struct InMemoryWal {
    entries: DashMap<Uuid, WalEntry>,
}

impl InMemoryWal {
    /// Construct an empty WAL.
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(
        &self,
        transaction_id: Uuid,
        expected: &[WalStatus],
        to: WalStatus,
        apply: impl FnOnce(&mut WalEntry),
    ) -> Result<(), WalError> {
        let mut entry = self
            .entries
            .get_mut(&transaction_id)
            .ok_or(WalError::NotFound(transaction_id))?;
        if !expected.contains(&entry.status) {
            return Err(WalError::InvalidTransition {
                transaction_id,
                from: entry.status,
                to,
            });
        }
        apply(&mut entry);
        entry.status = to;
        Ok(())
    }
}

#[async_trait]
impl Wal for InMemoryWal {
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
        self.entries.insert(entry.transaction_id, entry.clone());
        Ok(entry)
    }

    async fn mark_in_progress(&self, transaction_id: Uuid) -> Result<(), WalError> {
        self.transition(transaction_id, &[WalStatus::Pending], WalStatus::InProgress, |_| {})
    }

    async fn commit(&self, transaction_id: Uuid, duration_ms: i64) -> Result<(), WalError> {
        self.transition(
            transaction_id,
            &[WalStatus::InProgress],
            WalStatus::Committed,
            |e| {
                e.committed_at = Some(Utc::now());
                e.duration_ms = Some(duration_ms);
            },
        )
    }

    async fn fail(&self, transaction_id: Uuid, error_message: String) -> Result<(), WalError> {
        self.transition(
            transaction_id,
            &[WalStatus::Pending, WalStatus::InProgress],
            WalStatus::Failed,
            |e| {
                e.committed_at = Some(Utc::now());
                e.error_message = Some(error_message);
            },
        )
    }

    async fn roll_back(&self, transaction_id: Uuid) -> Result<(), WalError> {
        self.transition(
            transaction_id,
            &[WalStatus::Pending, WalStatus::InProgress],
            WalStatus::RolledBack,
            |e| {
                e.committed_at = Some(Utc::now());
            },
        )
    }

    async fn get(&self, transaction_id: Uuid) -> Result<Option<WalEntry>, WalError> {
        Ok(self.entries.get(&transaction_id).map(|e| e.clone()))
    }

    async fn non_terminal(&self) -> Result<Vec<WalEntry>, WalError> {
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.status.is_terminal())
            .map(|e| e.clone())
            .collect())
    }

    async fn compact_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, WalError> {
        let to_remove: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|e| e.status.is_terminal() && e.started_at < cutoff)
            .map(|e| e.transaction_id)
            .collect();
        let count = to_remove.len() as u64;
        for id in to_remove {
            self.entries.remove(&id);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn happy_path_commits() {
        let wal = InMemoryWal::new();
        let entry = wal
            .begin(OperationType::Upload, serde_json::json!({}), serde_json::json!({}), None)
            .await
            .unwrap();
        wal.mark_in_progress(entry.transaction_id).await.unwrap();
        wal.commit(entry.transaction_id, 42).await.unwrap();

        let fetched = wal.get(entry.transaction_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, WalStatus::Committed);
        assert_eq!(fetched.duration_ms, Some(42));
    }

    #[tokio::test]
    async fn rejects_out_of_order_transition() {
        let wal = InMemoryWal::new();
        let entry = wal
            .begin(OperationType::Delete, serde_json::json!({}), serde_json::json!({}), None)
            .await
            .unwrap();
        let err = wal.commit(entry.transaction_id, 1).await.unwrap_err();
        assert!(matches!(err, WalError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn non_terminal_scan_excludes_committed() {
        let wal = InMemoryWal::new();
        let a = wal
            .begin(OperationType::Upload, serde_json::json!({}), serde_json::json!({}), None)
            .await
            .unwrap();
        let b = wal
            .begin(OperationType::Upload, serde_json::json!({}), serde_json::json!({}), None)
            .await
            .unwrap();
        wal.mark_in_progress(a.transaction_id).await.unwrap();
        wal.commit(a.transaction_id, 1).await.unwrap();
        wal.mark_in_progress(b.transaction_id).await.unwrap();

        let pending = wal.non_terminal().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].transaction_id, b.transaction_id);
    }
}
