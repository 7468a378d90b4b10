//! DISCONNECT processing.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use mqrelay_core::packet::{reason, Disconnect};

use crate::broker::Broker;
use crate::connection::{ConnState, ConnectionHandle, DispatchResult};

pub(crate) fn handle(
    broker: &Broker,
    handle: &Arc<ConnectionHandle>,
    state: &mut ConnState,
    disconnect: Disconnect,
) -> DispatchResult {
    // A clean disconnect discards the will [MQTT-3.14.4-3] unless the v5
    // client explicitly asks for it to fire anyway.
    if disconnect.reason_code != reason::DISCONNECT_WITH_WILL {
        state.will = None;
    }

    log::debug!(
        "{}: client requested disconnect ({:#04x})",
        handle.id,
        disconnect.reason_code
    );
    handle.closing.store(true, Ordering::Relaxed);
    broker.sink.close(handle.id);
    DispatchResult::ok(None)
}
