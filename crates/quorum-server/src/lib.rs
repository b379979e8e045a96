//! # quorum-server
//!
//! why: a consensus core is only useful once it is wired to sockets, a clock and an application
//! relations: drives quorum_core::Node, persists through quorum_storage::FileStorage
//! what: udp transport, threaded server, key-value handler, client library

pub mod client;
pub mod error;
pub mod kv;
pub mod server;
pub mod transport;

pub use client::Client;
pub use error::{Result, ServerError};
pub use kv::KeyValueStore;
pub use server::{Server, ServerConfig, ServerHandle};
pub use transport::ChannelTransmitter;

/// Port a node listens on when none is given.
pub const DEFAULT_UDP_PORT: u16 = 2358;

/// Largest datagram a node or client will read.
pub const MAX_DATAGRAM_LEN: usize = 64 * 1024;

/// A blocking socket read gave up waiting.
pub(crate) fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// An icmp error from an earlier send surfaced on this socket.
pub(crate) fn is_unreachable(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::ConnectionReset
    )
}
