//! Static configuration for the query process, loaded the way every other
//! service's config loads: a YAML file overlaid with `QUERY__*` env vars.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_bind")]
    pub bind_addr: String,
    pub database_url: String,
    pub redis_url: String,
    pub jwt_public_key: String,
    /// Name of this query instance's consumer group, e.g. `query-1`.
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// This process's consumer name within the group, for PEL ownership.
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,
    /// Max deliveries before an event is moved to the dead-letter stream.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_bind() -> String {
    "0.0.0.0:8083".to_string()
}

fn default_consumer_group() -> String {
    "query-1".to_string()
}

fn default_consumer_name() -> String {
    "query-1-worker".to_string()
}

fn default_max_retries() -> u32 {
    5
}
