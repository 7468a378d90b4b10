//! Transport-agnostic MQTT broker engine.
//!
//! The embedding application owns sockets, timers and the event loop; the
//! engine owns protocol state. Wire it up by implementing [`PacketSink`]
//! (and optionally [`CredentialStore`]) and driving a [`Broker`] through
//! its connection callbacks.

pub mod auth;
pub mod broker;
pub mod config;
pub mod connection;
mod handlers;
pub mod retained;
pub mod session;
pub mod subscription;

pub use auth::{authenticate, Credentials, CredentialStore, StaticCredentials};
pub use broker::Broker;
pub use config::{BrokerConfig, ConfigError};
pub use connection::{ConnectionId, DispatchResult, PacketSink};
pub use retained::RetainedStore;
pub use session::{Session, StoredSubscription};
pub use subscription::{Subscriber, SubscriptionStore};
