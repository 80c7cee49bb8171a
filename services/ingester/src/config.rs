//! Static configuration for the ingester process, loaded the way
//! `storage-element`'s config loads: a YAML file overlaid with
//! `INGESTER__*` environment variables.

use serde::Deserialize;

/// Full configuration for the ingester process.
#[derive(Debug, Clone, Deserialize)]
pub struct IngesterConfig {
    /// `host:port` to bind the HTTP API on.
    #[serde(default = "default_bind")]
    pub bind_addr: String,
    /// Redis connection string for topology subscription and rate limiting.
    pub redis_url: String,
    /// PEM content or file path for the RS256 public key used to validate
    /// inbound JWTs. Shared with every other service's signing keys.
    pub jwt_public_key: String,
    /// Base URL of the admin-module API, used to register files after a
    /// successful upload.
    pub admin_base_url: String,
    /// Maximum accepted upload size in bytes, enforced before any
    /// storage-element is even chosen.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Requests allowed per service-account per [`rate_limit_window_secs`]
    /// (spec §4.6), when the caller carries a `rate_limit` claim of its own.
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0:8082".to_string()
}

fn default_max_upload_bytes() -> u64 {
    5 * 1024 * 1024 * 1024
}

fn default_rate_limit_window_secs() -> u64 {
    60
}
