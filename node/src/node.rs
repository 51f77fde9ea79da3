//! The node struct — wires the workers together.
//!
//! Construction performs every fallible initialization step (file tree
//! scan, socket binds, local address resolution) so that a failure in any
//! of them means no worker is ever started. [`Node::start`] then only
//! spawns tasks.

use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;

use shoal_fs::{FileIndex, FileTree, FileWatcher, WatchEvent};
use shoal_network::peer::SharedPeerTable;
use shoal_network::{worker, Discovery, DirectorySync, Multiplexer, PeerTable, Transport};

use crate::config::{validate_nickname, NodeConfig};
use crate::error::NodeError;
use crate::shutdown::ShutdownController;

/// Period of the file-index refresh loop that drains watcher events.
const FS_REFRESH_TICK: Duration = Duration::from_secs(1);

/// A running shoal node.
pub struct Node {
    config: NodeConfig,
    multiplexer: Arc<Multiplexer>,
    peers: SharedPeerTable,
    tree: Arc<RwLock<FileTree>>,
    watcher: Option<FileWatcher>,
    local_addr: IpAddr,
    shutdown: Arc<ShutdownController>,
    /// Handles for spawned worker tasks (joined during shutdown).
    task_handles: Vec<JoinHandle<()>>,
}

impl Node {
    /// Create and initialize a node: scan the share directory, bind the
    /// sockets, resolve the local address. Any failure here is fatal and
    /// leaves nothing running.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        if !validate_nickname(&config.nickname) {
            return Err(NodeError::InvalidNickname(config.nickname.clone()));
        }

        let tree = FileTree::scan(&config.share_dir)?;
        tracing::info!(
            share_dir = %config.share_dir.display(),
            files = tree.len(),
            "share directory indexed"
        );

        let watcher = match FileWatcher::watch(&config.share_dir) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "change watching unavailable, serving startup snapshot only");
                None
            }
        };

        let multiplexer = Arc::new(Multiplexer::bind(config.port)?);
        let local_addr = shoal_network::resolve_local_addr()?;
        tracing::info!(%local_addr, port = config.port, nickname = %config.nickname, "node initialized");

        Ok(Self {
            config,
            multiplexer,
            peers: PeerTable::shared(),
            tree: Arc::new(RwLock::new(tree)),
            watcher,
            local_addr,
            shutdown: Arc::new(ShutdownController::new()),
            task_handles: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> IpAddr {
        self.local_addr
    }

    pub fn peers(&self) -> SharedPeerTable {
        Arc::clone(&self.peers)
    }

    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn every worker. Idempotence is not needed: the daemon calls
    /// this exactly once after a successful [`Node::new`].
    pub fn start(&mut self) {
        let transport: Arc<dyn Transport> = Arc::clone(&self.multiplexer) as Arc<dyn Transport>;

        self.task_handles.push(tokio::spawn(
            Arc::clone(&self.multiplexer).run(self.shutdown.subscribe()),
        ));

        let discovery = Discovery::new(
            Arc::clone(&transport),
            Arc::clone(&self.peers),
            self.config.nickname.clone(),
            self.local_addr,
        );
        self.task_handles
            .push(tokio::spawn(discovery.run(self.shutdown.subscribe())));

        let dirsync = DirectorySync::new(
            transport,
            Arc::clone(&self.peers),
            Arc::clone(&self.tree) as Arc<dyn FileIndex>,
        );
        self.task_handles
            .push(tokio::spawn(dirsync.run(self.shutdown.subscribe())));

        if let Some(watcher) = self.watcher.take() {
            let tree = Arc::clone(&self.tree);
            let shutdown = self.shutdown.subscribe();
            self.task_handles.push(tokio::spawn(async move {
                worker::run_ticks("fs-refresh", FS_REFRESH_TICK, shutdown, move || {
                    apply_watch_events(&tree, watcher.drain());
                })
                .await;
            }));
        }
    }

    /// Signal every worker to stop and wait for them to finish their
    /// current tick and exit.
    pub async fn stop(&mut self) {
        self.shutdown.shutdown();
        for handle in self.task_handles.drain(..) {
            let _ = handle.await;
        }
        tracing::info!("node stopped");
    }

    /// Start the workers, block until SIGINT/SIGTERM, then stop them.
    pub async fn run_until_signal(&mut self) {
        self.start();
        self.shutdown.wait_for_signal().await;
        self.stop().await;
    }
}

/// Fold queued filesystem events into the shared file index.
fn apply_watch_events(tree: &RwLock<FileTree>, events: Vec<WatchEvent>) {
    if events.is_empty() {
        return;
    }
    let mut tree = match tree.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    for event in events {
        match event {
            WatchEvent::Created(path) | WatchEvent::Modified(path) => tree.refresh_path(&path),
            WatchEvent::Removed(path) => tree.remove_path(&path),
            WatchEvent::Renamed { from, to } => {
                tree.remove_path(&from);
                tree.refresh_path(&to);
            }
        }
    }
}
