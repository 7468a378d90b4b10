//! Core MQTT protocol engine: packet model, wire codec, property blocks,
//! topic matching and stream reassembly.
//!
//! Everything here is transport-agnostic. A broker or client owns the
//! sockets and feeds raw bytes through [`frame::FrameBuffer`]; this crate
//! turns them into [`packet::Packet`] values and back.

pub mod codec;
pub mod error;
pub mod frame;
pub mod packet;
pub mod properties;
pub mod topic;
pub mod varint;

pub use error::{Error, ProtocolError, Result};
