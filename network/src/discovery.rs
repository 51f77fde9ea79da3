//! Peer discovery state machine.
//!
//! Each tick runs three steps in order: emit a presence broadcast when the
//! broadcast period has elapsed, ingest queued discovery datagrams into the
//! peer table, and prune peers that have gone quiet.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use shoal_types::TimestampMs;
use shoal_wire::{MessageKind, Opcode, WireMessage, HEADER_LEN};

use crate::error::NetworkError;
use crate::peer::SharedPeerTable;
use crate::transport::Transport;
use crate::worker;

/// Period of the discovery loop.
pub const DISCOVERY_TICK: Duration = Duration::from_millis(50);

/// Minimum time between presence broadcasts. The tick runs much faster
/// than this; the throttle guarantees at most one broadcast per period.
pub const BROADCAST_PERIOD_MS: u64 = 1_000;

/// Nominal slot a nickname occupies in a discovery payload. Reads clamp to
/// the bytes actually present, so shorter nicknames are returned exactly.
const NICKNAME_SLOT: usize = 32;

/// Advertises this node and maintains the live peer set.
pub struct Discovery {
    transport: Arc<dyn Transport>,
    peers: SharedPeerTable,
    nickname: String,
    local_addr: IpAddr,
    /// `None` until the first broadcast, which is therefore immediate.
    last_broadcast: Option<TimestampMs>,
}

impl Discovery {
    pub fn new(
        transport: Arc<dyn Transport>,
        peers: SharedPeerTable,
        nickname: String,
        local_addr: IpAddr,
    ) -> Self {
        Self {
            transport,
            peers,
            nickname,
            local_addr,
            last_broadcast: None,
        }
    }

    /// One pass: emit, ingest, prune.
    pub fn tick(&mut self, now: TimestampMs) {
        self.emit_presence(now);
        self.ingest_broadcasts(now);
        self.prune_peers(now);
    }

    /// Run the state machine until shutdown.
    pub async fn run(mut self, shutdown: broadcast::Receiver<()>) {
        worker::run_ticks("discovery", DISCOVERY_TICK, shutdown, move || {
            self.tick(TimestampMs::now())
        })
        .await;
    }

    fn emit_presence(&mut self, now: TimestampMs) {
        let due = match self.last_broadcast {
            None => true,
            Some(last) => last.elapsed_since(now) >= BROADCAST_PERIOD_MS,
        };
        if !due {
            return;
        }
        tracing::trace!("emitting presence broadcast");
        self.transport.enqueue_outgoing(WireMessage::create_outgoing(
            MessageKind::Broadcast,
            self.local_addr,
            Opcode::Discovery,
            self.nickname.as_bytes(),
        ));
        self.last_broadcast = Some(now);
    }

    fn ingest_broadcasts(&self, now: TimestampMs) {
        while let Some(mut message) = self
            .transport
            .take_next_matching(&|m| m.opcode() == Opcode::Discovery)
        {
            if !message.has_valid_header() {
                continue;
            }
            // Our own broadcast loops back on the shared segment.
            if message.remote_addr() == self.local_addr {
                tracing::trace!("received own discovery broadcast");
                continue;
            }
            message.skip(HEADER_LEN);
            let nickname = message.read_fixed_string(NICKNAME_SLOT);
            let addr = message.remote_addr();

            let is_new = self
                .write_peers()
                .record_checkin(&nickname, addr, now);
            if is_new {
                tracing::info!(peer = %nickname, %addr, "discovered new peer");
            } else {
                tracing::trace!(peer = %nickname, %addr, "refreshed peer checkin");
            }
        }
    }

    fn prune_peers(&self, now: TimestampMs) {
        let removed = self.write_peers().prune_expired(now);
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "pruned timed-out peers");
        }
    }

    fn write_peers(&self) -> std::sync::RwLockWriteGuard<'_, crate::peer::PeerTable> {
        match self.peers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Resolve the address this node is reachable at on the local network,
/// for comparison against inbound broadcasts.
///
/// Fails when no usable (non-loopback, non-link-local, non-multicast,
/// non-Teredo) address exists; discovery must not start in that case.
pub fn resolve_local_addr() -> Result<IpAddr, NetworkError> {
    let addr = local_ip_address::local_ip()
        .map_err(|e| NetworkError::AddressResolution(e.to_string()))?;
    if !is_advertisable(addr) {
        return Err(NetworkError::AddressResolution(format!(
            "resolved address {addr} is not usable for discovery"
        )));
    }
    tracing::debug!(%addr, "resolved local network address");
    Ok(addr)
}

fn is_advertisable(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_multicast() && !v4.is_unspecified(),
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            !v6.is_loopback()
                && !v6.is_multicast()
                && !v6.is_unspecified()
                && (segments[0] & 0xffc0) != 0xfe80 // link-local
                && segments[..2] != [0x2001, 0x0000] // Teredo
        }
    }
}
