//! Share-directory index: relative paths, content digests, sizes.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest as _};
use walkdir::WalkDir;

use shoal_types::Digest;

use crate::error::FsError;

/// Blake2b parameterized to the 16-byte digest the wire format carries.
type Blake2b128 = Blake2b<U16>;

/// Read files in 64 KiB chunks while digesting.
const HASH_BUF_LEN: usize = 64 * 1024;

/// One tracked file in the local share directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the share root, `/`-separated.
    pub relative_path: String,
    pub digest: Digest,
    pub size: u64,
}

/// The snapshot seam the sync protocol depends on.
///
/// Implementations must be cheap enough to call on every served request;
/// the tree below answers from its in-memory index.
pub trait FileIndex: Send + Sync {
    fn snapshot(&self) -> Vec<FileEntry>;
}

/// In-memory index of the share directory, keyed by relative path.
pub struct FileTree {
    root: PathBuf,
    files: HashMap<String, FileEntry>,
}

impl FileTree {
    /// Walk `root` recursively and index every regular file.
    ///
    /// Unreadable files are skipped with a warning; an unreadable or missing
    /// root is fatal.
    pub fn scan(root: impl Into<PathBuf>) -> Result<Self, FsError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(FsError::NotADirectory(root));
        }
        let mut tree = Self {
            root,
            files: HashMap::new(),
        };
        for entry in WalkDir::new(&tree.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if entry.file_type().is_file() {
                tree.index_file(entry.path());
            }
        }
        tracing::debug!(
            root = %tree.root.display(),
            files = tree.files.len(),
            "scanned share directory"
        );
        Ok(tree)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Current view of every tracked file.
    pub fn snapshot(&self) -> Vec<FileEntry> {
        let mut entries: Vec<FileEntry> = self.files.values().cloned().collect();
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        entries
    }

    /// Re-index one absolute path after a create/modify event. Paths outside
    /// the root or no longer present as regular files fall back to removal.
    pub fn refresh_path(&mut self, abs: &Path) {
        if !abs.is_file() {
            self.remove_path(abs);
            return;
        }
        self.index_file(abs);
    }

    /// Drop the entry for an absolute path after a delete event.
    pub fn remove_path(&mut self, abs: &Path) {
        if let Some(rel) = self.relative_key(abs) {
            if self.files.remove(&rel).is_some() {
                tracing::debug!(path = %rel, "unregistered file");
            }
        }
    }

    fn relative_key(&self, abs: &Path) -> Option<String> {
        let rel = abs.strip_prefix(&self.root).ok()?;
        let mut key = String::new();
        for part in rel.components() {
            if !key.is_empty() {
                key.push('/');
            }
            key.push_str(&part.as_os_str().to_string_lossy());
        }
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }

    fn index_file(&mut self, abs: &Path) {
        let Some(rel) = self.relative_key(abs) else {
            tracing::warn!(path = %abs.display(), "path outside share root, ignoring");
            return;
        };
        match digest_file(abs) {
            Ok((digest, size)) => {
                self.files.insert(
                    rel.clone(),
                    FileEntry {
                        relative_path: rel,
                        digest,
                        size,
                    },
                );
            }
            Err(e) => {
                // The file may have vanished or be mid-write; it will be
                // retried on the next change event.
                tracing::warn!(path = %abs.display(), error = %e, "could not digest file, skipping");
                self.files.remove(&rel);
            }
        }
    }
}

impl FileIndex for RwLock<FileTree> {
    fn snapshot(&self) -> Vec<FileEntry> {
        match self.read() {
            Ok(guard) => guard.snapshot(),
            Err(poisoned) => poisoned.into_inner().snapshot(),
        }
    }
}

/// Digest a file's contents, returning the digest and the byte count read.
fn digest_file(path: &Path) -> std::io::Result<(Digest, u64)> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Blake2b128::new();
    let mut buf = vec![0u8; HASH_BUF_LEN];
    let mut size: u64 = 0;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    let digest: [u8; 16] = hasher.finalize().into();
    Ok((Digest::new(digest), size))
}
