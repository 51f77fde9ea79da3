//! Directory-listing sync protocol.
//!
//! Serves listing requests from the local file index, ingests listings
//! received from peers, and keeps remote listings fresh with throttled
//! requests. Runs on its own tick, sharing the peer table with discovery.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use shoal_fs::FileIndex;
use shoal_types::TimestampMs;
use shoal_wire::{listing, ListingEntry, MessageKind, Opcode, WireMessage, HEADER_LEN};

use crate::peer::SharedPeerTable;
use crate::transport::Transport;
use crate::worker;

/// Period of the directory-sync loop.
pub const DIRSYNC_TICK: Duration = Duration::from_millis(50);

/// Exchanges directory listings with discovered peers.
pub struct DirectorySync {
    transport: Arc<dyn Transport>,
    peers: SharedPeerTable,
    files: Arc<dyn FileIndex>,
}

impl DirectorySync {
    pub fn new(
        transport: Arc<dyn Transport>,
        peers: SharedPeerTable,
        files: Arc<dyn FileIndex>,
    ) -> Self {
        Self {
            transport,
            peers,
            files,
        }
    }

    /// One pass: answer requests, ingest listings, request stale ones.
    pub fn tick(&self, now: TimestampMs) {
        self.serve_requests();
        self.ingest_listings(now);
        self.request_stale_listings(now);
    }

    /// Run the protocol until shutdown.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) {
        worker::run_ticks("dirsync", DIRSYNC_TICK, shutdown, move || {
            self.tick(TimestampMs::now())
        })
        .await;
    }

    fn serve_requests(&self) {
        while let Some(message) = self
            .transport
            .take_next_matching(&|m| m.opcode() == Opcode::RequestDirectoryListing)
        {
            if !message.has_valid_header() {
                continue;
            }
            let entries: Vec<ListingEntry> = self
                .files
                .snapshot()
                .into_iter()
                .map(|f| ListingEntry {
                    relative_path: f.relative_path,
                    digest: f.digest,
                    size: f.size,
                })
                .collect();
            tracing::debug!(
                peer = %message.remote_addr(),
                files = entries.len(),
                "serving directory listing"
            );
            self.transport.enqueue_outgoing(WireMessage::create_outgoing(
                MessageKind::Direct,
                message.remote_addr(),
                Opcode::DirectoryListing,
                &listing::encode_entries(&entries),
            ));
        }
    }

    fn ingest_listings(&self, now: TimestampMs) {
        while let Some(mut message) = self
            .transport
            .take_next_matching(&|m| m.opcode() == Opcode::DirectoryListing)
        {
            if !message.has_valid_header() {
                continue;
            }
            let addr = message.remote_addr();
            message.skip(HEADER_LEN);
            let mut entries = Vec::new();
            while let Some(entry) = listing::read_entry(&mut message) {
                entries.push(entry);
            }
            let count = entries.len();

            let mut peers = self.write_peers();
            let id = peers.ensure_peer_for_addr(addr, now);
            peers.apply_listing(&id, entries, now);
            tracing::debug!(peer = %addr, files = count, "accepted directory listing");
        }
    }

    fn request_stale_listings(&self, now: TimestampMs) {
        let stale = {
            let peers = self.read_peers();
            peers.listing_stale_peers(now)
        };
        if stale.is_empty() {
            return;
        }
        let mut peers = self.write_peers();
        for id in stale {
            tracing::trace!(peer = %id.addr, "requesting directory listing");
            self.transport.enqueue_outgoing(WireMessage::create_outgoing(
                MessageKind::Direct,
                id.addr,
                Opcode::RequestDirectoryListing,
                &[],
            ));
            peers.mark_requested(&id, now);
        }
    }

    fn read_peers(&self) -> std::sync::RwLockReadGuard<'_, crate::peer::PeerTable> {
        match self.peers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_peers(&self) -> std::sync::RwLockWriteGuard<'_, crate::peer::PeerTable> {
        match self.peers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{PeerTable, DIRECTORY_STALE_MS};
    use crate::test_support::QueueTransport;
    use shoal_fs::FileEntry;
    use shoal_types::Digest;
    use std::net::{IpAddr, Ipv4Addr};

    const REMOTE: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));

    /// Fixed file index standing in for the share directory.
    struct StaticIndex(Vec<FileEntry>);

    impl FileIndex for StaticIndex {
        fn snapshot(&self) -> Vec<FileEntry> {
            self.0.clone()
        }
    }

    fn file(path: &str, size: u64) -> FileEntry {
        FileEntry {
            relative_path: path.to_string(),
            digest: Digest::new([7u8; 16]),
            size,
        }
    }

    fn dirsync(
        transport: Arc<QueueTransport>,
        peers: SharedPeerTable,
        files: Vec<FileEntry>,
    ) -> DirectorySync {
        DirectorySync::new(transport, peers, Arc::new(StaticIndex(files)))
    }

    fn request_from(addr: IpAddr) -> WireMessage {
        let out = WireMessage::create_outgoing(
            MessageKind::Direct,
            addr,
            Opcode::RequestDirectoryListing,
            &[],
        );
        // Inbound Direct payloads arrive with the length prefix stripped.
        WireMessage::incoming(MessageKind::Direct, addr, out.payload()[4..].to_vec())
    }

    fn listing_from(addr: IpAddr, entries: &[ListingEntry]) -> WireMessage {
        let out = WireMessage::create_outgoing(
            MessageKind::Direct,
            addr,
            Opcode::DirectoryListing,
            &listing::encode_entries(entries),
        );
        WireMessage::incoming(MessageKind::Direct, addr, out.payload()[4..].to_vec())
    }

    fn entry(path: &str, size: u64) -> ListingEntry {
        ListingEntry {
            relative_path: path.to_string(),
            digest: Digest::ZERO,
            size,
        }
    }

    #[test]
    fn request_is_served_with_local_snapshot() {
        let transport = QueueTransport::new();
        let sync = dirsync(
            Arc::clone(&transport),
            PeerTable::shared(),
            vec![file("a.txt", 5), file("b/c.txt", 9)],
        );

        transport.push_inbound(request_from(REMOTE));
        sync.tick(TimestampMs::new(0));

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        let reply = &sent[0];
        assert_eq!(reply.kind(), MessageKind::Direct);
        assert_eq!(reply.remote_addr(), REMOTE);

        // Decode the reply the way a receiver would.
        let mut decoded = WireMessage::incoming(
            MessageKind::Direct,
            REMOTE,
            reply.payload()[4..].to_vec(),
        );
        assert_eq!(decoded.opcode(), Opcode::DirectoryListing);
        decoded.skip(HEADER_LEN);
        let mut parsed = Vec::new();
        while let Some(e) = listing::read_entry(&mut decoded) {
            parsed.push(e);
        }
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].relative_path, "a.txt");
        assert_eq!(parsed[1].relative_path, "b/c.txt");
        assert_eq!(parsed[1].size, 9);
    }

    #[test]
    fn listing_from_unknown_peer_creates_placeholder_record() {
        let transport = QueueTransport::new();
        let peers = PeerTable::shared();
        let sync = dirsync(Arc::clone(&transport), Arc::clone(&peers), Vec::new());

        transport.push_inbound(listing_from(REMOTE, &[entry("x.bin", 1024)]));
        sync.tick(TimestampMs::new(50));

        let table = peers.read().unwrap();
        assert_eq!(table.len(), 1);
        let id = table.find_by_addr(REMOTE).unwrap();
        assert_eq!(id.nickname, "");
        let peer = table.get(&id).unwrap();
        assert_eq!(peer.directory_listing.len(), 1);
        assert_eq!(peer.directory_listing[0].relative_path, "x.bin");
        assert_eq!(peer.directory_listing[0].owner, id);
        assert_eq!(peer.last_directory_listing, TimestampMs::new(50));
    }

    #[test]
    fn listing_replaces_previous_entries_wholesale() {
        let transport = QueueTransport::new();
        let peers = PeerTable::shared();
        let sync = dirsync(Arc::clone(&transport), Arc::clone(&peers), Vec::new());

        transport.push_inbound(listing_from(REMOTE, &[entry("old1", 1), entry("old2", 2)]));
        sync.tick(TimestampMs::new(0));
        transport.push_inbound(listing_from(REMOTE, &[entry("new", 3)]));
        sync.tick(TimestampMs::new(100));

        let table = peers.read().unwrap();
        let id = table.find_by_addr(REMOTE).unwrap();
        let peer = table.get(&id).unwrap();
        assert_eq!(peer.directory_listing.len(), 1);
        assert_eq!(peer.directory_listing[0].relative_path, "new");
    }

    #[test]
    fn invalid_listing_header_is_discarded() {
        let transport = QueueTransport::new();
        let peers = PeerTable::shared();
        let sync = dirsync(Arc::clone(&transport), Arc::clone(&peers), Vec::new());

        let mut bytes = 0xffffffffu32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&11u16.to_le_bytes());
        transport.push_inbound(WireMessage::incoming(MessageKind::Direct, REMOTE, bytes));
        sync.tick(TimestampMs::new(0));

        assert!(peers.read().unwrap().is_empty());
    }

    #[test]
    fn truncated_listing_keeps_intact_prefix() {
        let transport = QueueTransport::new();
        let peers = PeerTable::shared();
        let sync = dirsync(Arc::clone(&transport), Arc::clone(&peers), Vec::new());

        let mut body = listing::encode_entries(&[entry("whole.txt", 4)]);
        body.extend_from_slice(b"cut-short\0\x01\x02"); // record missing most of its digest
        let out =
            WireMessage::create_outgoing(MessageKind::Direct, REMOTE, Opcode::DirectoryListing, &body);
        transport.push_inbound(WireMessage::incoming(
            MessageKind::Direct,
            REMOTE,
            out.payload()[4..].to_vec(),
        ));
        sync.tick(TimestampMs::new(0));

        let table = peers.read().unwrap();
        let id = table.find_by_addr(REMOTE).unwrap();
        let peer = table.get(&id).unwrap();
        assert_eq!(peer.directory_listing.len(), 1);
        assert_eq!(peer.directory_listing[0].relative_path, "whole.txt");
    }

    #[test]
    fn stale_peers_are_requested_once_per_window() {
        let transport = QueueTransport::new();
        let peers = PeerTable::shared();
        let sync = dirsync(Arc::clone(&transport), Arc::clone(&peers), Vec::new());

        peers
            .write()
            .unwrap()
            .record_checkin("bob", REMOTE, TimestampMs::new(0));

        // Past the staleness window with neither listing nor request: ask.
        let t1 = TimestampMs::new(DIRECTORY_STALE_MS + 1);
        sync.tick(t1);
        let sent = transport.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), MessageKind::Direct);
        assert_eq!(sent[0].remote_addr(), REMOTE);

        // Within the window of the request just sent: suppressed.
        sync.tick(TimestampMs::new(t1.as_millis() + DIRECTORY_STALE_MS));
        assert!(transport.take_sent().is_empty());

        // Window passed with no listing: ask again.
        sync.tick(TimestampMs::new(t1.as_millis() + DIRECTORY_STALE_MS + 1));
        assert_eq!(transport.take_sent().len(), 1);
    }

    #[test]
    fn fresh_listing_suppresses_requests() {
        let transport = QueueTransport::new();
        let peers = PeerTable::shared();
        let sync = dirsync(Arc::clone(&transport), Arc::clone(&peers), Vec::new());

        transport.push_inbound(listing_from(REMOTE, &[entry("a", 1)]));
        let t0 = TimestampMs::new(1_000);
        sync.tick(t0);
        assert!(transport.take_sent().is_empty());

        // Still inside the window measured from the accepted listing.
        sync.tick(TimestampMs::new(t0.as_millis() + DIRECTORY_STALE_MS));
        assert!(transport.take_sent().is_empty());
    }
}
