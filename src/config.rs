//! Configuration for the query-sharding layer
//!
//! TOML-deserializable settings with sensible defaults. The configured values
//! act as the per-tenant defaults; individual requests may override the shard
//! count or disable sharding through their
//! [`QueryOptions`](crate::types::QueryOptions).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sharding configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShardingConfig {
    /// Default total shard count for queries that do not override it
    ///
    /// Values of 0 or 1 disable sharding.
    #[serde(default = "default_total_shards")]
    pub total_shards: u32,

    /// Disable query sharding entirely
    #[serde(default)]
    pub sharding_disabled: bool,

    /// Upper bound on how long one request's shard fan-out may take, in
    /// milliseconds
    #[serde(default = "default_fanout_timeout_ms")]
    pub fanout_timeout_ms: u64,
}

fn default_total_shards() -> u32 {
    16
}

fn default_fanout_timeout_ms() -> u64 {
    30_000
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            total_shards: default_total_shards(),
            sharding_disabled: false,
            fanout_timeout_ms: default_fanout_timeout_ms(),
        }
    }
}

impl ShardingConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml(text: &str) -> crate::error::Result<Self> {
        toml::from_str(text)
            .map_err(|e| crate::error::Error::BadData(format!("invalid sharding config: {}", e)))
    }

    /// The fan-out timeout as a [`Duration`]
    pub fn fanout_timeout(&self) -> Duration {
        Duration::from_millis(self.fanout_timeout_ms)
    }
}
