//! Keep-alive settings.

use serde::Deserialize;

pub const DEFAULT_KEEP_ALIVE: u16 = 60;
pub const DEFAULT_MAX_KEEP_ALIVE: u16 = 600;

/// Session configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Keep-alive applied when a client requests 0 (0 leaves it disabled).
    pub default_keep_alive: u16,
    /// Upper bound on client-requested keep-alive; larger requests are
    /// clamped and, on v5, reported via Server Keep Alive.
    pub max_keep_alive: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_keep_alive: DEFAULT_KEEP_ALIVE,
            max_keep_alive: DEFAULT_MAX_KEEP_ALIVE,
        }
    }
}
