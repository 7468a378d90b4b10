//! Client configuration types.

use bytes::Bytes;
use mqrelay_core::packet::{QoS, Will};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Client identifier (empty lets the server assign one on v5).
    pub client_id: String,
    /// Username for authentication.
    pub username: Option<String>,
    /// Password for authentication.
    pub password: Option<Vec<u8>>,
    /// Keep-alive interval in seconds (0 = disabled).
    pub keep_alive: u16,
    /// Clean session flag.
    pub clean_session: bool,
    /// MQTT protocol level (3 = 3.1, 4 = 3.1.1, 5 = 5.0).
    pub protocol_version: u8,
    /// Last Will and Testament, announced in CONNECT.
    pub will: Option<WillConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            username: None,
            password: None,
            keep_alive: 60,
            clean_session: true,
            protocol_version: 4,
            will: None,
        }
    }
}

impl ClientConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    /// Set username and password.
    pub fn credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<Vec<u8>>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set keep-alive interval in seconds.
    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    /// Set clean session flag.
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Use MQTT 5.0.
    pub fn mqtt5(mut self) -> Self {
        self.protocol_version = 5;
        self
    }

    /// Set the Last Will and Testament.
    pub fn will(mut self, will: WillConfig) -> Self {
        self.will = Some(will);
        self
    }
}

/// Last Will and Testament message, published by the broker if the
/// connection ends without a clean DISCONNECT.
#[derive(Debug, Clone)]
pub struct WillConfig {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl WillConfig {
    /// Create a will with QoS 0 and no retain.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub(crate) fn to_packet(&self) -> Will {
        Will {
            topic: self.topic.clone(),
            payload: self.payload.clone(),
            qos: self.qos,
            retain: self.retain,
            properties: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_will_builder() {
        let will = WillConfig::new("client/status", "offline")
            .qos(QoS::AtLeastOnce)
            .retain(true);

        assert_eq!(will.topic, "client/status");
        assert_eq!(will.payload.as_ref(), b"offline");
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(will.retain);
    }
}
