//! Client error types.

use std::io;

use mqrelay_core::ProtocolError;
use thiserror::Error;

/// Client error type.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("All packet identifiers are in flight")]
    PacketIdsExhausted,
}

impl From<mqrelay_core::Error> for ClientError {
    fn from(err: mqrelay_core::Error) -> Self {
        match err {
            mqrelay_core::Error::Io(e) => ClientError::Io(e),
            mqrelay_core::Error::Protocol(e) => ClientError::Protocol(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
