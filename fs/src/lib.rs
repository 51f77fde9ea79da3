//! Local file tree for the shoal sync agent.
//!
//! Walks a share directory, digests every regular file, and keeps the index
//! current as the directory changes. The sync protocol consumes this crate
//! only through the [`FileIndex`] snapshot seam.

pub mod error;
pub mod tree;
pub mod watcher;

pub use error::FsError;
pub use tree::{FileEntry, FileIndex, FileTree};
pub use watcher::{FileWatcher, WatchEvent};
