//! Broker configuration.
//!
//! Supports configuration from:
//! - TOML file (default: `mqrelay.toml`)
//! - Environment variables with `MQRELAY__` prefix (double underscore for nesting)
//! - In-file variable substitution: `${VAR}` or `${VAR:-default}`
//!
//! Environment variable examples:
//! - `MQRELAY__LIMITS__MAX_PACKET_SIZE=2097152`
//! - `MQRELAY__MQTT__MAX_QOS=1`
//!
//! In-file substitution examples:
//! ```toml
//! [session]
//! max_keep_alive = "${MQTT_MAX_KEEP_ALIVE:-600}"
//! ```

mod auth;
mod limits;
mod mqtt;
mod retained;
mod session;

use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use auth::{AuthConfig, UserConfig};
pub use limits::{
    LimitsConfig, DEFAULT_MAX_PACKET_SIZE, DEFAULT_MAX_TOPIC_LENGTH, DEFAULT_MAX_TOPIC_LEVELS,
};
pub use mqtt::MqttConfig;
pub use retained::{RetainedConfig, DEFAULT_EXPIRE_INTERVAL_SECS, DEFAULT_MAX_DELIVERIES};
pub use session::{SessionConfig, DEFAULT_KEEP_ALIVE, DEFAULT_MAX_KEEP_ALIVE};

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Limits configuration.
    pub limits: LimitsConfig,
    /// Session configuration.
    pub session: SessionConfig,
    /// MQTT feature configuration.
    pub mqtt: MqttConfig,
    /// Retained-message store configuration.
    pub retained: RetainedConfig,
    /// Authentication configuration.
    pub auth: AuthConfig,
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// Config parsing/loading error.
    Config(config::ConfigError),
    /// Invalid configuration value.
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

impl BrokerConfig {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `MQRELAY__` prefix with double underscores for nesting:
    ///    - `MQRELAY__LIMITS__MAX_PACKET_SIZE=2097152`
    ///    - `MQRELAY__AUTH__ALLOW_ANONYMOUS=false`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("limits.max_packet_size", DEFAULT_MAX_PACKET_SIZE as i64)?
            .set_default("limits.max_topic_length", DEFAULT_MAX_TOPIC_LENGTH as i64)?
            .set_default("limits.max_topic_levels", DEFAULT_MAX_TOPIC_LEVELS as i64)?
            .set_default("session.default_keep_alive", DEFAULT_KEEP_ALIVE as i64)?
            .set_default("session.max_keep_alive", DEFAULT_MAX_KEEP_ALIVE as i64)?
            .set_default("mqtt.max_qos", 2)?
            .set_default("mqtt.retain_available", true)?
            .set_default("mqtt.wildcard_subscriptions", true)?
            .set_default("mqtt.shared_subscriptions", true)?
            .set_default("mqtt.subscription_identifiers", true)?
            .set_default(
                "retained.expire_interval_secs",
                DEFAULT_EXPIRE_INTERVAL_SECS as i64,
            )?
            .set_default("retained.max_deliveries", DEFAULT_MAX_DELIVERIES as i64)?
            // Auth defaults (disabled by default)
            .set_default("auth.enabled", false)?
            .set_default("auth.allow_anonymous", true)?;

        // Load from file with env var substitution
        let path = path.as_ref();
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    let substituted = substitute_env_vars(&content);
                    builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
                }
                Err(e) => return Err(ConfigError::Io(e)),
            }
        }

        // Override with environment variables (MQRELAY__MQTT__MAX_QOS, etc.)
        let cfg = builder
            .add_source(
                Environment::with_prefix("MQRELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: BrokerConfig = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (for testing).
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let substituted = substitute_env_vars(content);
        let config: BrokerConfig = toml::from_str(&substituted)
            .map_err(|e| ConfigError::Validation(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate().map_err(ConfigError::Validation)?;
        self.mqtt.validate().map_err(ConfigError::Validation)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BrokerConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[limits]
max_packet_size = 2097152
max_topic_levels = 64

[session]
default_keep_alive = 120
max_keep_alive = 300

[mqtt]
max_qos = 1
retain_available = false

[retained]
expire_interval_secs = 60
max_deliveries = 2
"#;
        let config = BrokerConfig::parse(toml).unwrap();
        assert_eq!(config.limits.max_packet_size, 2097152);
        assert_eq!(config.limits.max_topic_levels, 64);
        assert_eq!(config.session.default_keep_alive, 120);
        assert_eq!(config.session.max_keep_alive, 300);
        assert_eq!(config.mqtt.max_qos, 1);
        assert!(!config.mqtt.retain_available);
        assert_eq!(config.retained.expire_interval_secs, 60);
        assert_eq!(config.retained.max_deliveries, 2);
    }

    #[test]
    fn test_parse_partial_toml() {
        // Only override some values, rest should use defaults
        let toml = r#"
[limits]
max_packet_size = 512000
"#;
        let config = BrokerConfig::parse(toml).unwrap();
        assert_eq!(config.limits.max_packet_size, 512000);
        assert_eq!(config.limits.max_topic_levels, DEFAULT_MAX_TOPIC_LEVELS);
        assert_eq!(config.mqtt.max_qos, 2);
    }

    #[test]
    fn test_parse_users() {
        let toml = r#"
[auth]
enabled = true
allow_anonymous = false

[[auth.users]]
username = "sensor"
password = "hunter2"
allowed_addresses = ["10.0.0.5"]
"#;
        let config = BrokerConfig::parse(toml).unwrap();
        assert!(config.auth.enabled);
        assert!(!config.auth.allow_anonymous);
        assert_eq!(config.auth.users.len(), 1);
        assert_eq!(config.auth.users[0].username, "sensor");
        assert_eq!(config.auth.users[0].allowed_addresses.len(), 1);
    }

    #[test]
    fn test_invalid_max_qos_rejected() {
        let toml = r#"
[mqtt]
max_qos = 3
"#;
        assert!(BrokerConfig::parse(toml).is_err());
    }

    #[test]
    fn test_env_var_substitution_with_default() {
        std::env::remove_var("MQRELAY_TEST_NONEXISTENT");
        let content = r#"max_qos = "${MQRELAY_TEST_NONEXISTENT:-1}""#;
        let substituted = substitute_env_vars(content);
        assert!(substituted.contains("max_qos = \"1\""));
    }
}
