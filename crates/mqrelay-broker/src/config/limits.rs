//! Packet and topic limits.

use serde::Deserialize;

pub const DEFAULT_MAX_PACKET_SIZE: u32 = 1024 * 1024;
pub const DEFAULT_MAX_TOPIC_LENGTH: usize = 1024;
pub const DEFAULT_MAX_TOPIC_LEVELS: usize = 32;

/// Limits configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum total packet size in bytes (0 disables the check).
    pub max_packet_size: u32,
    /// Maximum topic length in bytes (0 disables the check).
    pub max_topic_length: usize,
    /// Maximum number of topic levels (0 disables the check).
    pub max_topic_levels: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_topic_length: DEFAULT_MAX_TOPIC_LENGTH,
            max_topic_levels: DEFAULT_MAX_TOPIC_LEVELS,
        }
    }
}

impl LimitsConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_topic_length > 65_535 {
            return Err("limits.max_topic_length cannot exceed 65535".to_string());
        }
        Ok(())
    }
}
