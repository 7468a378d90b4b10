//! MQTT feature switches.

use serde::Deserialize;

/// MQTT feature configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Maximum QoS granted to subscribers and accepted from publishers (0-2).
    pub max_qos: u8,
    /// Whether retained messages are accepted.
    pub retain_available: bool,
    /// Whether wildcard subscription filters are accepted.
    pub wildcard_subscriptions: bool,
    /// Whether `$share/<group>/` subscriptions are accepted.
    pub shared_subscriptions: bool,
    /// Whether v5 subscription identifiers are accepted.
    pub subscription_identifiers: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            max_qos: 2,
            retain_available: true,
            wildcard_subscriptions: true,
            shared_subscriptions: true,
            subscription_identifiers: true,
        }
    }
}

impl MqttConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_qos > 2 {
            return Err(format!("mqtt.max_qos must be 0-2, got {}", self.max_qos));
        }
        Ok(())
    }
}
