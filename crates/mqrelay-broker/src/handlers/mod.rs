//! Per-packet-type processing, invoked from the broker's dispatch loop.

pub(crate) mod connect;
pub(crate) mod disconnect;
pub(crate) mod publish;
pub(crate) mod qos;
pub(crate) mod subscribe;
