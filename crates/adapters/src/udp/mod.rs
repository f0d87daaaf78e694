//! Raw NetFlow/IPFIX datagram intake.

pub mod forwarder;
pub mod listener;

use std::net::SocketAddr;

/// One admitted datagram on its way downstream.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub peer: SocketAddr,
    pub payload: Vec<u8>,
}
