//! Authentication settings.

use std::net::IpAddr;

use serde::Deserialize;

/// Authentication configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Whether credential checks are performed at all.
    pub enabled: bool,
    /// Whether connections without a username are accepted when auth is
    /// enabled.
    pub allow_anonymous: bool,
    /// Static user list.
    pub users: Vec<UserConfig>,
}

/// A configured user.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub username: String,
    /// Plaintext password. Use only for development.
    #[serde(default)]
    pub password: Option<String>,
    /// Argon2 hash in PHC string format (recommended).
    /// Example: $argon2id$v=19$m=65536,t=3,p=4$c29tZXNhbHQ$...
    #[serde(default)]
    pub password_hash: Option<String>,
    /// Source addresses this user may connect from. Empty allows any.
    #[serde(default)]
    pub allowed_addresses: Vec<IpAddr>,
}
