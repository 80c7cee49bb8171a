//! Static configuration for one storage-element process, loaded the way
//! the teacher's `cmd/config.rs` loads `MeshConfig`: a YAML file overlaid
//! with `STORAGE_ELEMENT__*` environment variables.

use serde::Deserialize;

/// Full configuration for a storage-element process.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageElementConfig {
    /// This element's stable identity, shared with admin-module's registry.
    pub element_id: String,
    /// Root directory all data and attr files live under.
    pub base_path: String,
    /// Total declared capacity in bytes, used for adaptive thresholds.
    pub capacity_bytes: u64,
    /// Selector tiebreak priority; lower sorts first.
    pub priority: u16,
    /// Starting mode; the mode can later change via the admin API.
    #[serde(default = "default_mode")]
    pub initial_mode: String,
    /// `host:port` to bind the HTTP API on.
    #[serde(default = "default_bind")]
    pub bind_addr: String,
    /// Redis connection string for health reports and priority registries.
    pub redis_url: String,
    /// PEM content or file path for the RS256 public key used to validate
    /// inbound JWTs.
    pub jwt_public_key: String,
    /// Seconds between health-report publishes.
    #[serde(default = "default_health_interval")]
    pub health_report_interval_secs: u64,
    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_mode() -> String {
    "EDIT".to_string()
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_health_interval() -> u64 {
    10
}

fn default_max_upload_bytes() -> u64 {
    5 * 1024 * 1024 * 1024
}

impl StorageElementConfig {
    /// Path to the rusqlite-backed local cache index.
    pub fn cache_db_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.base_path).join(".cache").join("index.db")
    }

    /// Path to the WAL's own SQLite database.
    pub fn wal_db_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.base_path).join(".cache").join("wal.db")
    }
}
