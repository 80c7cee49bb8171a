//! Static configuration for the admin-module process.

use serde::Deserialize;

/// Full configuration for an admin-module process.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// `host:port` to bind the HTTP API on.
    #[serde(default = "default_bind")]
    pub bind_addr: String,
    /// Postgres connection string for the admin database.
    pub database_url: String,
    /// Redis connection string for locks, registries and topology.
    pub redis_url: String,
    /// PEM content or file path for the RS256 private key used to sign JWTs.
    pub jwt_private_key: String,
    /// PEM content or file path for the matching RS256 public key.
    pub jwt_public_key: String,
    /// Failed admin-user login attempts before lockout.
    #[serde(default = "default_lockout_threshold")]
    pub lockout_threshold: u32,
    /// Lockout duration once the threshold is reached.
    #[serde(default = "default_lockout_minutes")]
    pub lockout_minutes: i64,
    /// Seconds between topology heartbeat publishes.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,
    /// Seconds between key-rotation eligibility checks.
    #[serde(default = "default_rotation_check_secs")]
    pub rotation_check_interval_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0:8081".to_string()
}

fn default_lockout_threshold() -> u32 {
    5
}

fn default_lockout_minutes() -> i64 {
    15
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_rotation_check_secs() -> u64 {
    300
}
