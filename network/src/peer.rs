//! Peer records and the shared peer table.
//!
//! The table is mutated by two workers on independent schedules: discovery
//! (insert/refresh/prune) and directory sync (placeholder insertion and
//! listing replacement). It is therefore always shared behind its own lock;
//! nothing here assumes single-thread ownership.
//!
//! Every operation that involves time takes `now` as a parameter so the
//! throttle and timeout behavior is testable with a synthetic clock.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use shoal_types::{Digest, TimestampMs};
use shoal_wire::ListingEntry;

/// A peer is removed once this long passes without a discovery checkin.
pub const PEER_TIMEOUT_MS: u64 = 10_000;

/// A peer's listing is re-requested once both its last accepted listing and
/// the last request sent to it are older than this.
pub const DIRECTORY_STALE_MS: u64 = 10_000;

/// Structural identity of a peer.
///
/// Two records are the same peer iff both nickname and address match; the
/// hash is only the map's lookup accelerator, never the comparison.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PeerId {
    pub nickname: String,
    pub addr: IpAddr,
}

/// One file believed to exist at a remote peer.
///
/// `owner` is the owning peer's identity key by value — a lookup-only
/// association, not ownership. Entries never outlive their peer record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFileEntry {
    pub relative_path: String,
    pub digest: Digest,
    pub size: u64,
    pub owner: PeerId,
}

/// A live remote participant.
#[derive(Clone, Debug)]
pub struct Peer {
    pub id: PeerId,
    /// Most recent discovery broadcast received from this peer.
    pub last_checkin: TimestampMs,
    /// Most recent accepted directory listing.
    pub last_directory_listing: TimestampMs,
    /// When this peer was last asked for a listing.
    pub last_directory_request: TimestampMs,
    /// Files currently believed to exist at this peer. Replaced wholesale
    /// on each accepted listing, never merged.
    pub directory_listing: Vec<RemoteFileEntry>,
}

impl Peer {
    fn new(id: PeerId, now: TimestampMs) -> Self {
        Self {
            id,
            last_checkin: now,
            last_directory_listing: TimestampMs::EPOCH,
            last_directory_request: TimestampMs::EPOCH,
            directory_listing: Vec::new(),
        }
    }

    /// Whether this peer has gone quiet past the discovery timeout.
    pub fn has_timed_out(&self, now: TimestampMs) -> bool {
        self.last_checkin.has_expired(PEER_TIMEOUT_MS, now)
    }
}

/// The set of known peers, keyed by structural identity.
pub struct PeerTable {
    peers: HashMap<PeerId, Peer>,
}

/// The peer table as both protocol workers hold it.
pub type SharedPeerTable = Arc<RwLock<PeerTable>>;

impl PeerTable {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Wrap a fresh table for sharing between the workers.
    pub fn shared() -> SharedPeerTable {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, id: &PeerId) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Record a discovery checkin. A known peer gets its `last_checkin`
    /// refreshed (directory state is untouched); an unknown one is
    /// inserted. Returns `true` when the peer is new.
    pub fn record_checkin(&mut self, nickname: &str, addr: IpAddr, now: TimestampMs) -> bool {
        let id = PeerId {
            nickname: nickname.to_string(),
            addr,
        };
        match self.peers.get_mut(&id) {
            Some(peer) => {
                peer.last_checkin = now;
                false
            }
            None => {
                self.peers.insert(id.clone(), Peer::new(id, now));
                true
            }
        }
    }

    /// Remove every peer whose last checkin is older than
    /// [`PEER_TIMEOUT_MS`]. Returns the removed identities.
    pub fn prune_expired(&mut self, now: TimestampMs) -> Vec<PeerId> {
        let expired: Vec<PeerId> = self
            .peers
            .values()
            .filter(|p| p.has_timed_out(now))
            .map(|p| p.id.clone())
            .collect();
        for id in &expired {
            self.peers.remove(id);
        }
        expired
    }

    /// Find a peer by source address alone. Directory listings carry no
    /// nickname, so this is how replies are attributed.
    pub fn find_by_addr(&self, addr: IpAddr) -> Option<PeerId> {
        self.peers.keys().find(|id| id.addr == addr).cloned()
    }

    /// Find the peer at `addr`, or synthesize a placeholder record with an
    /// empty nickname. Unsolicited listings create peers independent of the
    /// discovery broadcast; `last_checkin` is set to `now` so the record is
    /// not pruned before the peer's first broadcast arrives.
    pub fn ensure_peer_for_addr(&mut self, addr: IpAddr, now: TimestampMs) -> PeerId {
        if let Some(id) = self.find_by_addr(addr) {
            return id;
        }
        let id = PeerId {
            nickname: String::new(),
            addr,
        };
        self.peers.insert(id.clone(), Peer::new(id.clone(), now));
        id
    }

    /// Replace a peer's remote-file set with the given listing and stamp
    /// `last_directory_listing`. No-op if the peer vanished in between.
    pub fn apply_listing(&mut self, id: &PeerId, entries: Vec<ListingEntry>, now: TimestampMs) {
        let Some(peer) = self.peers.get_mut(id) else {
            return;
        };
        peer.directory_listing = entries
            .into_iter()
            .map(|e| RemoteFileEntry {
                relative_path: e.relative_path,
                digest: e.digest,
                size: e.size,
                owner: id.clone(),
            })
            .collect();
        peer.last_directory_listing = now;
    }

    /// Stamp `last_directory_request`, suppressing further requests to this
    /// peer for the staleness window.
    pub fn mark_requested(&mut self, id: &PeerId, now: TimestampMs) {
        if let Some(peer) = self.peers.get_mut(id) {
            peer.last_directory_request = now;
        }
    }

    /// Peers whose listing wants refreshing: both the last accepted listing
    /// and the last request sent must be older than the staleness
    /// threshold. The double condition keeps a request from being repeated
    /// while the previous one is still plausibly in flight.
    pub fn listing_stale_peers(&self, now: TimestampMs) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|p| {
                p.last_directory_listing.has_expired(DIRECTORY_STALE_MS, now)
                    && p.last_directory_request.has_expired(DIRECTORY_STALE_MS, now)
            })
            .map(|p| p.id.clone())
            .collect()
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}
