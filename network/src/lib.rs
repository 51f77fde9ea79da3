//! P2P networking layer for the shoal sync agent.
//!
//! Owns the sockets and queues (transport multiplexer), the peer table and
//! discovery state machine, and the directory-listing sync protocol. The
//! three workers run on independent tick schedules and communicate only
//! through the multiplexer's queues and the shared peer table.

pub mod discovery;
pub mod dirsync;
pub mod error;
pub mod multiplexer;
pub mod peer;
pub mod transport;
pub mod worker;

pub use discovery::{resolve_local_addr, Discovery};
pub use dirsync::DirectorySync;
pub use error::NetworkError;
pub use multiplexer::Multiplexer;
pub use peer::{Peer, PeerId, PeerTable, RemoteFileEntry, SharedPeerTable};
pub use transport::Transport;

#[cfg(test)]
pub(crate) mod test_support;
