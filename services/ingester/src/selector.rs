//! Storage-element selection: sequential fill by priority (spec §4.4).
//!
//! Candidates come from the two write-eligible priority sorted sets
//! (`storage:rw:by_priority`, `storage:edit:by_priority`); an element only
//! ever appears there if its mode is currently write-eligible and its last
//! reported capacity status was not `FULL` (`registry::update_priority_membership`
//! removes it otherwise), so membership alone satisfies rule 1's mode/full
//! filter. Rule 1's `status == ONLINE` check (an admin-level enable/disable
//! flag distinct from capacity) comes from the topology cache instead, since
//! the registry hash carries no such field.

use std::sync::Arc;

use artstore_capacity::{calculate_adaptive_threshold, can_accept_file, AdmissionReason, ThresholdMode};
use artstore_redis::registry::{self, PriorityMode};
use redis::aio::ConnectionManager;

use crate::error::IngesterError;
use crate::topology::TopologyCache;

/// A storage element chosen to receive an upload.
#[derive(Debug, Clone)]
pub struct Selection {
    pub element_id: String,
    pub api_url: String,
}

/// Pick the first eligible storage element that can admit `file_size` bytes,
/// trying candidates in ascending-priority order (lexicographic tie-break on
/// `element_id`, which `ZRANGE` already gives us per mode).
pub async fn select(
    redis: &mut ConnectionManager,
    topology: &Arc<TopologyCache>,
    file_size: u64,
) -> Result<Selection, IngesterError> {
    let mut candidates: Vec<(String, PriorityMode)> = Vec::new();
    for mode in [PriorityMode::Edit, PriorityMode::Rw] {
        for element_id in registry::candidates(redis, mode).await? {
            candidates.push((element_id, mode));
        }
    }

    let mut scored = Vec::with_capacity(candidates.len());
    for (element_id, mode) in candidates {
        let report = registry::read_health_report(redis, &element_id).await?;
        let priority: u32 = report.get("priority").and_then(|v| v.parse().ok()).unwrap_or(u32::MAX);
        scored.push((priority, element_id, mode));
    }
    rank(&mut scored);

    let mut last_reason = AdmissionReason::StorageFull;
    for (_, element_id, mode) in scored {
        let Some(summary) = topology.get(&element_id).await else {
            tracing::debug!(element_id, "candidate has no topology entry yet, skipping");
            continue;
        };
        if summary.status != "ONLINE" {
            continue;
        }

        let report = registry::read_health_report(redis, &element_id).await?;
        let used_bytes: u64 = report.get("used_bytes").and_then(|v| v.parse().ok()).unwrap_or(0);
        let total_bytes = summary.capacity_bytes.max(0) as u64;

        let threshold_mode = match mode {
            PriorityMode::Rw => ThresholdMode::Rw,
            PriorityMode::Edit => ThresholdMode::Edit,
        };
        let thresholds = calculate_adaptive_threshold(total_bytes, threshold_mode);
        let (admit, reason) = can_accept_file(file_size, used_bytes, total_bytes, Some(thresholds));
        if admit {
            return Ok(Selection { element_id: summary.element_id, api_url: summary.api_url });
        }
        last_reason = reason;
    }

    Err(IngesterError::Capacity(format!("no eligible storage element could admit the upload ({last_reason:?})")))
}

/// Sort candidates ascending by priority, breaking ties lexicographically on
/// `element_id`. Mode is carried along but never compared: the spec's tie
/// break is element_id alone, regardless of which priority set a candidate
/// came from.
fn rank(scored: &mut [(u32, String, PriorityMode)]) {
    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_priority_number_sorts_first() {
        let mut scored = vec![
            (5, "se-b".to_string(), PriorityMode::Rw),
            (1, "se-a".to_string(), PriorityMode::Edit),
            (5, "se-a".to_string(), PriorityMode::Rw),
        ];
        rank(&mut scored);
        let ids: Vec<&str> = scored.iter().map(|(_, id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["se-a", "se-a", "se-b"]);
        assert_eq!(scored[0].0, 1);
    }

    #[test]
    fn equal_priority_ties_break_lexicographically_on_element_id_not_mode() {
        let mut scored = vec![
            (3, "se-z".to_string(), PriorityMode::Edit),
            (3, "se-m".to_string(), PriorityMode::Rw),
        ];
        rank(&mut scored);
        assert_eq!(scored[0].1, "se-m");
        assert_eq!(scored[1].1, "se-z");
    }
}
