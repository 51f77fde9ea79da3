//! Wire protocol for shoal node-to-node communication.
//!
//! Every packet starts with a 4-byte magic constant and a 2-byte opcode,
//! both little-endian. Payload layout beyond the header is opcode-specific;
//! the directory-listing record codec lives in [`listing`].

pub mod listing;
pub mod message;

pub use listing::ListingEntry;
pub use message::{MessageKind, Opcode, WireMessage, HEADER_LEN, LEN_PREFIX, MAGIC};
