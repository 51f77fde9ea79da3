//! The shoal node — orchestrates the transport multiplexer, peer
//! discovery, directory sync, and the local file index.

pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod shutdown;

pub use config::{validate_nickname, NodeConfig, DEFAULT_PORT};
pub use error::NodeError;
pub use logging::{init_logging, LogFormat};
pub use node::Node;
pub use shutdown::ShutdownController;
