//! Transport multiplexer — sole owner of the UDP socket and TCP listener.
//!
//! One UDP datagram socket and one TCP listener share the configured port.
//! All protocol logic is decoupled from raw I/O through two FIFO queues;
//! a fixed-period pump moves bytes between the sockets and the queues in a
//! fixed phase order: accept, then receive, then send.
//!
//! Every socket is non-blocking, so a pump pass never stalls waiting for
//! data. The one synchronous spot is the per-message TCP connect used for
//! Direct sends, bounded by a connect timeout.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;

use shoal_wire::{MessageKind, WireMessage, LEN_PREFIX};

use crate::error::NetworkError;
use crate::transport::Transport;
use crate::worker;

/// Period of the pump loop.
pub const PUMP_TICK: Duration = Duration::from_millis(500);

/// Upper bound on a Direct frame, length prefix included. A stream whose
/// prefix exceeds this is desynced or hostile and gets dropped.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Timeout for the outbound TCP connection a Direct send opens.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read chunk size for draining sockets.
const READ_CHUNK_LEN: usize = 64 * 1024;

/// An accepted inbound TCP connection plus the bytes of any frame still
/// arriving. Partial frames stay buffered here between pump passes.
#[derive(Debug)]
struct Connection {
    stream: TcpStream,
    peer_ip: IpAddr,
    buf: Vec<u8>,
}

impl Connection {
    /// Drain everything currently readable into the frame buffer.
    /// Returns `false` once the peer has closed the stream and the buffer
    /// holds no complete frame worth keeping.
    fn fill(&mut self) -> std::io::Result<bool> {
        let mut chunk = [0u8; READ_CHUNK_LEN];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Pop complete length-prefixed frames off the front of the buffer.
    /// The prefix counts the whole frame including itself, so the payload
    /// handed back starts at the magic constant.
    fn extract_frames(&mut self) -> std::io::Result<Vec<Vec<u8>>> {
        let mut frames = Vec::new();
        loop {
            if self.buf.len() < LEN_PREFIX {
                return Ok(frames);
            }
            let total =
                u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
            if total < LEN_PREFIX || total > MAX_FRAME_LEN {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("bad frame length {total}"),
                ));
            }
            if self.buf.len() < total {
                return Ok(frames);
            }
            frames.push(self.buf[LEN_PREFIX..total].to_vec());
            self.buf.drain(..total);
        }
    }
}

/// Owns the sockets, the connected-peer set, and the inbound/outbound
/// message queues.
#[derive(Debug)]
pub struct Multiplexer {
    port: u16,
    udp: UdpSocket,
    listener: TcpListener,
    inbound: Mutex<VecDeque<WireMessage>>,
    outbound: Mutex<VecDeque<WireMessage>>,
    connections: Mutex<Vec<Connection>>,
}

impl Multiplexer {
    /// Bind the UDP socket and TCP listener on `port`, all interfaces.
    ///
    /// Either bind failing is fatal to the whole component: the caller must
    /// not start dependent workers.
    pub fn bind(port: u16) -> Result<Self, NetworkError> {
        let udp_err = |source| NetworkError::Bind {
            transport: "udp",
            port,
            source,
        };
        let udp = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).map_err(udp_err)?;
        udp.set_nonblocking(true).map_err(udp_err)?;
        udp.set_broadcast(true).map_err(udp_err)?;
        udp.set_multicast_loop_v4(false).map_err(udp_err)?;

        let tcp_err = |source| NetworkError::Bind {
            transport: "tcp",
            port,
            source,
        };
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).map_err(tcp_err)?;
        listener.set_nonblocking(true).map_err(tcp_err)?;

        tracing::info!(port, "bound transport multiplexer");
        Ok(Self {
            port,
            udp,
            listener,
            inbound: Mutex::new(VecDeque::new()),
            outbound: Mutex::new(VecDeque::new()),
            connections: Mutex::new(Vec::new()),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// One pump pass: accept, receive, send, in that order.
    pub fn pump(&self) {
        self.accept_connections();
        self.receive_messages();
        self.send_messages();
    }

    /// Run the pump until shutdown, logging overruns of the tick period.
    pub async fn run(self: Arc<Self>, shutdown: broadcast::Receiver<()>) {
        worker::run_ticks("multiplexer", PUMP_TICK, shutdown, move || self.pump()).await;
    }

    fn accept_connections(&self) {
        let mut connections = lock(&self.connections);
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        tracing::warn!(peer = %addr, error = %e, "could not configure accepted socket");
                        continue;
                    }
                    tracing::info!(peer = %addr, "accepted connection");
                    connections.push(Connection {
                        stream,
                        peer_ip: addr.ip(),
                        buf: Vec::new(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn receive_messages(&self) {
        let mut inbound = lock(&self.inbound);

        // Datagrams
        let mut buf = [0u8; READ_CHUNK_LEN];
        loop {
            match self.udp.recv_from(&mut buf) {
                Ok((n, from)) => {
                    tracing::trace!(peer = %from, bytes = n, "received datagram");
                    inbound.push_back(WireMessage::incoming(
                        MessageKind::Datagram,
                        from.ip(),
                        buf[..n].to_vec(),
                    ));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "could not receive datagram");
                    break;
                }
            }
        }

        // Direct messages: drain each connection, then peel off every frame
        // that has fully arrived. Partial frames wait for a later pass.
        let mut connections = lock(&self.connections);
        connections.retain_mut(|conn| {
            let still_open = match conn.fill() {
                Ok(open) => open,
                Err(e) => {
                    tracing::warn!(peer = %conn.peer_ip, error = %e, "read failed, dropping connection");
                    return false;
                }
            };
            let frames = match conn.extract_frames() {
                Ok(frames) => frames,
                Err(e) => {
                    tracing::warn!(peer = %conn.peer_ip, error = %e, "bad frame, dropping connection");
                    return false;
                }
            };
            for frame in frames {
                tracing::trace!(peer = %conn.peer_ip, bytes = frame.len(), "received direct message");
                inbound.push_back(WireMessage::incoming(
                    MessageKind::Direct,
                    conn.peer_ip,
                    frame,
                ));
            }
            // A closed stream can never complete a buffered partial frame.
            still_open
        });
    }

    fn send_messages(&self) {
        let mut outbound = lock(&self.outbound);
        for message in outbound.drain(..) {
            match message.kind() {
                MessageKind::Broadcast => {
                    // Force the destination to the broadcast address no
                    // matter what the sender put there.
                    let dest = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), self.port);
                    if let Err(e) = self.udp.send_to(message.payload(), dest) {
                        tracing::warn!(error = %e, "could not send broadcast");
                    }
                }
                MessageKind::Datagram => {
                    let dest = SocketAddr::new(message.remote_addr(), self.port);
                    if let Err(e) = self.udp.send_to(message.payload(), dest) {
                        tracing::warn!(peer = %dest, error = %e, "could not send datagram");
                    }
                }
                MessageKind::Direct => {
                    let dest = SocketAddr::new(message.remote_addr(), self.port);
                    match TcpStream::connect_timeout(&dest, CONNECT_TIMEOUT) {
                        Ok(mut stream) => match stream.write_all(message.payload()) {
                            Ok(()) => {
                                tracing::trace!(
                                    peer = %dest,
                                    bytes = message.payload().len(),
                                    "sent direct message"
                                );
                            }
                            Err(e) => {
                                tracing::warn!(peer = %dest, error = %e, "could not write direct message");
                            }
                        },
                        // At-most-once delivery: no retry, no requeue.
                        Err(e) => {
                            tracing::warn!(peer = %dest, error = %e, "could not connect for direct message");
                        }
                    }
                }
            }
        }
    }
}

impl Transport for Multiplexer {
    fn enqueue_outgoing(&self, message: WireMessage) {
        lock(&self.outbound).push_back(message);
    }

    fn take_next_matching(
        &self,
        predicate: &dyn Fn(&WireMessage) -> bool,
    ) -> Option<WireMessage> {
        let mut inbound = lock(&self.inbound);
        let index = inbound.iter().position(|m| predicate(m))?;
        inbound.remove(index)
    }

    fn pending_inbound(&self) -> usize {
        lock(&self.inbound).len()
    }
}

/// Lock a mutex, recovering the guard if a worker panicked mid-tick.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
