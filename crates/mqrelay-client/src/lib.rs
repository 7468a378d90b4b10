//! mqrelay-client - Sans-IO MQTT client protocol engine.
//!
//! The engine owns protocol state only; the application owns the socket and
//! the timer. Feed received bytes in with [`Client::handle_incoming`], write
//! out whatever [`Client::take_outgoing`] returns, and poll
//! [`Client::next_event`] for things to react to.
//!
//! # Example
//!
//! ```ignore
//! use mqrelay_client::{Client, ClientConfig, ClientEvent, QoS};
//!
//! let mut client = Client::new(ClientConfig::new("my-client").mqtt5());
//! client.connect()?;
//! socket.write_all(&client.take_outgoing())?;
//!
//! let n = socket.read(&mut buf)?;
//! client.handle_incoming(&buf[..n])?;
//! while let Some(event) = client.next_event() {
//!     if let ClientEvent::Connected { .. } = event {
//!         client.subscribe(&[("sensors/#", QoS::AtLeastOnce)])?;
//!     }
//! }
//! socket.write_all(&client.take_outgoing())?;
//! ```

mod client;
mod config;
mod error;
mod events;
mod packet_id;
mod session;

pub use client::Client;
pub use config::{ClientConfig, WillConfig};
pub use error::{ClientError, Result};
pub use events::ClientEvent;
pub use packet_id::PacketIdAllocator;

// Re-export the core types that appear in the public API.
pub use mqrelay_core::packet::{QoS, RetainHandling, SubscriptionOptions};
