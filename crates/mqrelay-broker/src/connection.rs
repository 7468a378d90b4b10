//! Connection identities, the transport-facing sink and per-connection
//! state.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::time::Instant;

use bytes::Bytes;
use mqrelay_core::frame::FrameBuffer;
use mqrelay_core::packet::{PacketType, Will};
use parking_lot::Mutex;

use crate::session::Session;

/// Opaque identity of one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound interface the external transport implements.
///
/// Both methods must be non-blocking and must not call back into the broker
/// synchronously; in particular, the `connection_closed` notification that
/// follows a [`PacketSink::close`] has to arrive on a separate call stack.
pub trait PacketSink: Send + Sync {
    /// Queue already-encoded packet bytes for transmission.
    fn send(&self, connection: ConnectionId, bytes: Bytes);
    /// Ask the transport to tear the connection down.
    fn close(&self, connection: ConnectionId);
}

/// Mutable per-connection state, touched only by that connection's
/// sequential receive path.
pub(crate) struct ConnState {
    pub frame: FrameBuffer,
    pub will: Option<Will>,
    pub session: Session,
}

/// One connection as the broker tracks it. The atomics are readable from
/// other connections' fan-out paths without taking the state mutex.
pub(crate) struct ConnectionHandle {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    /// Negotiated protocol level; 0 until CONNECT is accepted.
    pub version: AtomicU8,
    pub connected: AtomicBool,
    pub closing: AtomicBool,
    /// Effective keep-alive in seconds (0 disables the sweep for this
    /// connection).
    pub keep_alive: AtomicU16,
    next_packet_id: AtomicU16,
    pub last_activity: Mutex<Instant>,
    pub state: Mutex<ConnState>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, remote_addr: SocketAddr) -> Self {
        Self {
            id,
            remote_addr,
            version: AtomicU8::new(0),
            connected: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            keep_alive: AtomicU16::new(0),
            next_packet_id: AtomicU16::new(1),
            last_activity: Mutex::new(Instant::now()),
            state: Mutex::new(ConnState {
                frame: FrameBuffer::new(),
                will: None,
                session: Session::default(),
            }),
        }
    }

    /// Protocol level used when encoding for this peer (level 4 until the
    /// real one is negotiated).
    pub fn encode_version(&self) -> u8 {
        match self.version.load(Ordering::Relaxed) {
            0 => 4,
            v => v,
        }
    }

    pub fn is_v5(&self) -> bool {
        self.version.load(Ordering::Relaxed) == 5
    }

    pub fn is_live(&self) -> bool {
        self.connected.load(Ordering::Relaxed) && !self.closing.load(Ordering::Relaxed)
    }

    /// Next outbound packet identifier for QoS > 0 deliveries to this
    /// peer. A wrapping counter that skips zero; the broker performs no
    /// retransmission tracking, so wrap-around collisions are acceptable.
    pub fn allocate_packet_id(&self) -> u16 {
        loop {
            let id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

/// Outcome of processing one inbound packet, for logging/telemetry by the
/// embedding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    pub success: bool,
    /// Reason code describing the outcome (SUCCESS for the happy path).
    pub reason_code: u8,
    /// Human-readable detail, set on failures.
    pub message: Option<String>,
    /// Type of the response packet sent back on this connection, if any.
    pub response: Option<PacketType>,
}

impl DispatchResult {
    pub fn ok(response: Option<PacketType>) -> Self {
        Self {
            success: true,
            reason_code: mqrelay_core::packet::reason::SUCCESS,
            message: None,
            response,
        }
    }

    pub fn failed(reason_code: u8, message: impl Into<String>, response: Option<PacketType>) -> Self {
        Self {
            success: false,
            reason_code,
            message: Some(message.into()),
            response,
        }
    }
}
