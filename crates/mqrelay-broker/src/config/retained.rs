//! Retained-message store settings.

use serde::Deserialize;

pub const DEFAULT_EXPIRE_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_MAX_DELIVERIES: u32 = 16;

/// Retained store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetainedConfig {
    /// Seconds a retained entry lives when the publish carries no
    /// Message Expiry Interval of its own.
    pub expire_interval_secs: u64,
    /// Number of replays a QoS 1 retained entry survives before it is
    /// dropped from the store.
    pub max_deliveries: u32,
}

impl Default for RetainedConfig {
    fn default() -> Self {
        Self {
            expire_interval_secs: DEFAULT_EXPIRE_INTERVAL_SECS,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
        }
    }
}
