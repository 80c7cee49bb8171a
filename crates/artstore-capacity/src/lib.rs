//! Adaptive capacity thresholds and the ingester's pre-flight admission
//! check (spec §4.4 "Capacity status (adaptive)").
//!
//! Thresholds scale with the storage-element's total size: a fixed
//! percentage, floored at a fixed minimum free space, whichever reserves
//! more headroom for a large element. RO/AR modes never have thresholds
//! and are always `OK` (they accept no writes, so capacity is moot).

#![warn(missing_docs)]

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const CRITICAL_SIZE_LIMIT_BYTES: u64 = 100 * 1024 * 1024;

/// A storage element's write-eligible mode, as seen by the calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdMode {
    /// Read-write, not yet approaching end of life.
    Rw,
    /// Primary editable mode.
    Edit,
}

/// Resolved free-space thresholds for one storage element, in bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// `used_percent` at or above which status becomes `WARNING`.
    pub warning_threshold_pct: f64,
    /// `used_percent` at or above which status becomes `CRITICAL`.
    pub critical_threshold_pct: f64,
    /// `used_percent` at or above which status becomes `FULL`.
    pub full_threshold_pct: f64,
}

/// Capacity classification of a storage element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityStatus {
    /// Plenty of room.
    Ok,
    /// Approaching the configured warning threshold.
    Warning,
    /// Approaching the configured critical threshold; large files rejected.
    Critical,
    /// No further writes admitted.
    Full,
}

fn pct_gb_pair(mode: ThresholdMode) -> ((f64, f64), (f64, f64), (f64, f64)) {
    match mode {
        // (pct, min_gb) for (warning, critical, full)
        ThresholdMode::Rw => ((0.15, 150.0), (0.08, 80.0), (0.02, 20.0)),
        ThresholdMode::Edit => ((0.10, 100.0), (0.05, 50.0), (0.02, 20.0)),
    }
}

/// Compute adaptive thresholds for a storage element with `total_bytes`
/// capacity operating in `mode`. Returns `None` for read-only modes, which
/// have no thresholds and can never be `FULL`.
pub fn calculate_adaptive_threshold(total_bytes: u64, mode: ThresholdMode) -> Thresholds {
    let total_gb = total_bytes as f64 / GIB;
    let ((warn_pct, warn_min_gb), (crit_pct, crit_min_gb), (full_pct, full_min_gb)) =
        pct_gb_pair(mode);

    let warning_free_gb = (total_gb * warn_pct).max(warn_min_gb);
    let critical_free_gb = (total_gb * crit_pct).max(crit_min_gb);
    let full_free_gb = (total_gb * full_pct).max(full_min_gb);

    let to_used_pct = |free_gb: f64| -> f64 {
        if total_gb <= 0.0 {
            100.0
        } else {
            (1.0 - free_gb / total_gb) * 100.0
        }
    };

    Thresholds {
        warning_threshold_pct: to_used_pct(warning_free_gb),
        critical_threshold_pct: to_used_pct(critical_free_gb),
        full_threshold_pct: to_used_pct(full_free_gb),
    }
}

/// Classify current usage against `thresholds`. `thresholds = None` means a
/// read-only mode, which is always `OK`. A `total_bytes` of zero is `FULL`.
pub fn get_capacity_status(
    used_bytes: u64,
    total_bytes: u64,
    thresholds: Option<Thresholds>,
) -> CapacityStatus {
    let Some(thresholds) = thresholds else {
        return CapacityStatus::Ok;
    };

    if total_bytes == 0 {
        return CapacityStatus::Full;
    }

    let used_pct = used_bytes as f64 / total_bytes as f64 * 100.0;

    if used_pct >= thresholds.full_threshold_pct {
        CapacityStatus::Full
    } else if used_pct >= thresholds.critical_threshold_pct {
        CapacityStatus::Critical
    } else if used_pct >= thresholds.warning_threshold_pct {
        CapacityStatus::Warning
    } else {
        CapacityStatus::Ok
    }
}

/// Reason an upload was rejected or admitted by the pre-flight check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionReason {
    /// Admitted.
    Ok,
    /// Storage element's mode does not accept writes.
    StorageModeReadonly,
    /// Already at or past the `FULL` threshold.
    StorageFull,
    /// Would cross the `FULL` threshold after this upload.
    InsufficientSpaceAfterUpload,
    /// Status is `CRITICAL` and the file exceeds the 100 MiB cap (spec §4.4
    /// rule 3 — applies only at CRITICAL, not at WARNING; see open question
    /// in spec §9, preserved as written in the source).
    FileTooLargeForCriticalCapacity,
}

/// Pre-flight admission check run by the ingester selector before routing
/// a stream to a candidate storage element.
pub fn can_accept_file(
    file_size: u64,
    used_bytes: u64,
    total_bytes: u64,
    thresholds: Option<Thresholds>,
) -> (bool, AdmissionReason) {
    let Some(thresholds) = thresholds else {
        return (false, AdmissionReason::StorageModeReadonly);
    };

    let status = get_capacity_status(used_bytes, total_bytes, Some(thresholds));
    if status == CapacityStatus::Full {
        return (false, AdmissionReason::StorageFull);
    }

    let used_after_pct = (used_bytes + file_size) as f64 / total_bytes as f64 * 100.0;
    if used_after_pct >= thresholds.full_threshold_pct {
        return (false, AdmissionReason::InsufficientSpaceAfterUpload);
    }

    if status == CapacityStatus::Critical && file_size > CRITICAL_SIZE_LIMIT_BYTES {
        return (false, AdmissionReason::FileTooLargeForCriticalCapacity);
    }

    (true, AdmissionReason::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;
    const TB: u64 = 1024 * GB;

    #[test]
    fn rw_large_storage_uses_percentage_thresholds() {
        let t = calculate_adaptive_threshold(10 * TB, ThresholdMode::Rw);
        assert!((t.warning_threshold_pct - 85.0).abs() < 0.1);
        assert!((t.critical_threshold_pct - 92.0).abs() < 0.1);
        assert!((t.full_threshold_pct - 98.0).abs() < 0.1);
    }

    #[test]
    fn rw_small_storage_floors_at_minimum_gb() {
        let t = calculate_adaptive_threshold(500 * GB, ThresholdMode::Rw);
        assert!((t.warning_threshold_pct - 70.0).abs() < 0.1);
        assert!((t.critical_threshold_pct - 84.0).abs() < 0.1);
        assert!((t.full_threshold_pct - 96.0).abs() < 0.1);
    }

    #[test]
    fn status_transitions_at_1tb_rw() {
        let t = calculate_adaptive_threshold(1 * TB, ThresholdMode::Rw);
        let total = 1 * TB;
        assert_eq!(
            get_capacity_status((total as f64 * 0.50) as u64, total, Some(t)),
            CapacityStatus::Ok
        );
        assert_eq!(
            get_capacity_status((total as f64 * 0.86) as u64, total, Some(t)),
            CapacityStatus::Warning
        );
        assert_eq!(
            get_capacity_status((total as f64 * 0.93) as u64, total, Some(t)),
            CapacityStatus::Critical
        );
        assert_eq!(
            get_capacity_status((total as f64 * 0.99) as u64, total, Some(t)),
            CapacityStatus::Full
        );
    }

    #[test]
    fn zero_total_is_full() {
        let t = calculate_adaptive_threshold(1 * TB, ThresholdMode::Rw);
        assert_eq!(get_capacity_status(0, 0, Some(t)), CapacityStatus::Full);
    }

    #[test]
    fn readonly_mode_has_no_thresholds_and_is_always_ok() {
        assert_eq!(get_capacity_status(900 * GB, 1 * TB, None), CapacityStatus::Ok);
    }

    #[test]
    fn critical_rejects_large_file_but_accepts_small_one() {
        let t = calculate_adaptive_threshold(500 * GB, ThresholdMode::Edit);
        let total = 500 * GB;
        let used = (total as f64 * 0.92) as u64;

        let (ok, reason) = can_accept_file(200 * 1024 * 1024, used, total, Some(t));
        assert!(!ok);
        assert_eq!(reason, AdmissionReason::FileTooLargeForCriticalCapacity);

        let (ok, reason) = can_accept_file(50 * 1024 * 1024, used, total, Some(t));
        assert!(ok);
        assert_eq!(reason, AdmissionReason::Ok);
    }

    #[test]
    fn rejects_when_upload_would_cross_full_threshold() {
        let t = calculate_adaptive_threshold(500 * GB, ThresholdMode::Edit);
        let total = 500 * GB;
        let used = 480 * GB;
        let (ok, reason) = can_accept_file(15 * GB, used, total, Some(t));
        assert!(!ok);
        assert_eq!(reason, AdmissionReason::InsufficientSpaceAfterUpload);
    }

    #[test]
    fn readonly_mode_rejects_all_uploads() {
        let (ok, reason) = can_accept_file(1 * GB, 500 * GB, 1 * TB, None);
        assert!(!ok);
        assert_eq!(reason, AdmissionReason::StorageModeReadonly);
    }
}
