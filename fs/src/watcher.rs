//! Change watching for the share directory.
//!
//! Events are queued rather than delivered by callback so the refresh
//! worker can drain them on its own tick, alongside the protocol workers.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::FsError;

/// Simplified file system event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

/// Watches a directory tree and queues translated events.
///
/// The underlying watcher stays active as long as this struct is alive.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    rx: Mutex<Receiver<WatchEvent>>,
}

impl FileWatcher {
    /// Start watching `path` recursively.
    pub fn watch(path: &Path) -> Result<Self, FsError> {
        let (tx, rx): (Sender<WatchEvent>, Receiver<WatchEvent>) = mpsc::channel();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for translated in translate_event(&event) {
                        let _ = tx.send(translated);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "file watcher error");
                }
            })
            .map_err(|e| FsError::Watch {
                path: path.to_path_buf(),
                source: e,
            })?;

        watcher
            .watch(path, RecursiveMode::Recursive)
            .map_err(|e| FsError::Watch {
                path: path.to_path_buf(),
                source: e,
            })?;

        tracing::debug!(path = %path.display(), "watching share directory for changes");
        Ok(Self {
            _watcher: watcher,
            rx: Mutex::new(rx),
        })
    }

    /// Take every event queued since the last drain.
    pub fn drain(&self) -> Vec<WatchEvent> {
        let rx = match self.rx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        rx.try_iter().collect()
    }
}

/// Translate a raw `notify::Event` into zero or more `WatchEvent`s.
fn translate_event(event: &Event) -> Vec<WatchEvent> {
    let paths = &event.paths;

    match &event.kind {
        EventKind::Create(_) => paths
            .iter()
            .map(|p| WatchEvent::Created(p.clone()))
            .collect(),

        EventKind::Modify(modify_kind) => {
            use notify::event::ModifyKind;
            match modify_kind {
                ModifyKind::Name(_) if paths.len() >= 2 => {
                    vec![WatchEvent::Renamed {
                        from: paths[0].clone(),
                        to: paths[1].clone(),
                    }]
                }
                _ => paths
                    .iter()
                    .map(|p| WatchEvent::Modified(p.clone()))
                    .collect(),
            }
        }

        EventKind::Remove(_) => paths
            .iter()
            .map(|p| WatchEvent::Removed(p.clone()))
            .collect(),

        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_create_event() {
        let event = Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/tmp/new.txt")],
            attrs: Default::default(),
        };
        let translated = translate_event(&event);
        assert_eq!(translated, vec![WatchEvent::Created("/tmp/new.txt".into())]);
    }

    #[test]
    fn translate_remove_event() {
        let event = Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/tmp/gone.txt")],
            attrs: Default::default(),
        };
        let translated = translate_event(&event);
        assert_eq!(translated, vec![WatchEvent::Removed("/tmp/gone.txt".into())]);
    }

    #[test]
    fn translate_rename_event() {
        let event = Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Name(
                notify::event::RenameMode::Both,
            )),
            paths: vec![PathBuf::from("/tmp/old.txt"), PathBuf::from("/tmp/new.txt")],
            attrs: Default::default(),
        };
        let translated = translate_event(&event);
        assert_eq!(
            translated,
            vec![WatchEvent::Renamed {
                from: "/tmp/old.txt".into(),
                to: "/tmp/new.txt".into(),
            }]
        );
    }

    #[test]
    fn drain_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = FileWatcher::watch(dir.path()).unwrap();
        assert!(watcher.drain().is_empty());
    }
}
