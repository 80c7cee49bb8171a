//! The storage-element mode state machine (spec §4.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A storage element's operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StorageMode {
    /// Primary editable mode; only reachable via config + restart.
    Edit,
    /// Read-write, winding down toward read-only.
    Rw,
    /// Frozen working set; reads and metadata only.
    Ro,
    /// Long-term archive; metadata-only, terminal.
    Ar,
}

impl StorageMode {
    /// Parse the wire form (`"edit"`, `"rw"`, `"ro"`, `"ar"`, case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "EDIT" => Some(StorageMode::Edit),
            "RW" => Some(StorageMode::Rw),
            "RO" => Some(StorageMode::Ro),
            "AR" => Some(StorageMode::Ar),
            _ => None,
        }
    }

    /// Lowercase wire form, as used in API responses and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            StorageMode::Edit => "edit",
            StorageMode::Rw => "rw",
            StorageMode::Ro => "ro",
            StorageMode::Ar => "ar",
        }
    }

    /// Whether `Upload`/create is permitted in this mode.
    pub fn allows_create(self) -> bool {
        matches!(self, StorageMode::Edit | StorageMode::Rw)
    }

    /// Whether `UpdateMetadata` is permitted in this mode.
    pub fn allows_update(self) -> bool {
        matches!(self, StorageMode::Edit | StorageMode::Rw)
    }

    /// Whether `Delete` is permitted in this mode.
    pub fn allows_delete(self) -> bool {
        matches!(self, StorageMode::Edit)
    }

    /// Whether `Download`/read is permitted in this mode.
    pub fn allows_read(self) -> bool {
        matches!(self, StorageMode::Edit | StorageMode::Rw | StorageMode::Ro)
    }

    /// Whether this mode is reachable as an API-driven transition from `self`.
    pub fn can_transition_to(self, target: StorageMode) -> bool {
        matches!(
            (self, target),
            (StorageMode::Rw, StorageMode::Ro) | (StorageMode::Ro, StorageMode::Ar)
        )
    }
}

/// One recorded mode transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeTransition {
    /// Mode before the transition.
    pub from: StorageMode,
    /// Mode after the transition.
    pub to: StorageMode,
    /// When the transition was applied.
    pub timestamp: DateTime<Utc>,
    /// Free-text operator-supplied reason, if any.
    pub reason: Option<String>,
}

/// Reasons an API-driven mode transition was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeTransitionError {
    /// Already in the requested mode.
    AlreadyInMode,
    /// The matrix does not permit this transition.
    NotPermitted { from: StorageMode, to: StorageMode },
}

/// In-memory, append-only mode history for one storage element.
#[derive(Debug, Default)]
pub struct ModeHistory {
    transitions: Vec<ModeTransition>,
}

impl ModeHistory {
    /// Validate and, if legal, append a transition to the history.
    pub fn apply(
        &mut self,
        current: StorageMode,
        target: StorageMode,
        reason: Option<String>,
    ) -> Result<ModeTransition, ModeTransitionError> {
        if current == target {
            return Err(ModeTransitionError::AlreadyInMode);
        }
        if !current.can_transition_to(target) {
            return Err(ModeTransitionError::NotPermitted { from: current, to: target });
        }
        let transition = ModeTransition { from: current, to: target, timestamp: Utc::now(), reason };
        self.transitions.push(transition.clone());
        Ok(transition)
    }

    /// Full transition history, oldest first.
    pub fn history(&self) -> &[ModeTransition] {
        &self.transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rw_to_ro_to_ar_is_legal() {
        let mut history = ModeHistory::default();
        assert!(history.apply(StorageMode::Rw, StorageMode::Ro, None).is_ok());
        assert!(history.apply(StorageMode::Ro, StorageMode::Ar, None).is_ok());
        assert_eq!(history.history().len(), 2);
    }

    #[test]
    fn repeating_a_mode_is_rejected() {
        let mut history = ModeHistory::default();
        let err = history.apply(StorageMode::Ro, StorageMode::Ro, None).unwrap_err();
        assert_eq!(err, ModeTransitionError::AlreadyInMode);
    }

    #[test]
    fn ro_to_rw_is_not_permitted() {
        let mut history = ModeHistory::default();
        let err = history.apply(StorageMode::Ro, StorageMode::Rw, None).unwrap_err();
        assert!(matches!(err, ModeTransitionError::NotPermitted { .. }));
    }

    #[test]
    fn ar_is_terminal() {
        let mut history = ModeHistory::default();
        assert!(history.apply(StorageMode::Ar, StorageMode::Rw, None).is_err());
        assert!(history.apply(StorageMode::Ar, StorageMode::Ro, None).is_err());
    }

    #[test]
    fn permission_matrix_matches_spec_table() {
        assert!(StorageMode::Edit.allows_create());
        assert!(StorageMode::Edit.allows_delete());
        assert!(StorageMode::Rw.allows_create());
        assert!(!StorageMode::Rw.allows_delete());
        assert!(StorageMode::Ro.allows_read());
        assert!(!StorageMode::Ro.allows_update());
        assert!(!StorageMode::Ar.allows_read());
    }
}
