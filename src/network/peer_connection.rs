//! Peer Connection Management
//! One task per socket: drains the outbound queue, reads into the input
//! buffer, runs the framer and hands complete frames to the dispatch loop.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::constants::wire::READ_CHUNK_SIZE;
use crate::error::PeerError;
use crate::network::registry::PeerTable;
use crate::network::wire::{self, Frame, PeerAddr};

/// Small integer, unique among live peers, reused after disconnect
pub type PeerId = usize;

/// Direction of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDirection {
    Inbound,  // Peer connected to us
    Outbound, // We connected to peer
}

/// Items on a peer's outbound queue
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Bytes),
    /// Flush what was queued before and end the connection
    Close,
}

/// A frame read from a peer, queued for the dispatch loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub peer: PeerId,
    pub frame: Frame,
}

#[derive(Debug)]
struct PeerState {
    version: Option<u8>,
    listen: Option<PeerAddr>,
    running: bool,
}

/// Registry-side handle of a live connection
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    remote_addr: SocketAddr,
    direction: ConnectionDirection,
    connected_at: Instant,
    tx: mpsc::UnboundedSender<Outbound>,
    state: Mutex<PeerState>,
}

impl Peer {
    pub(crate) fn new(
        id: PeerId,
        remote_addr: SocketAddr,
        direction: ConnectionDirection,
        tx: mpsc::UnboundedSender<Outbound>,
        listen: Option<PeerAddr>,
    ) -> Self {
        Self {
            id,
            remote_addr,
            direction,
            connected_at: Instant::now(),
            tx,
            state: Mutex::new(PeerState {
                version: None,
                listen,
                running: true,
            }),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn direction(&self) -> ConnectionDirection {
        self.direction
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Protocol version from the peer's HELLO, if one arrived
    pub fn version(&self) -> Option<u8> {
        self.state.lock().version
    }

    pub(crate) fn set_version(&self, version: u8) {
        self.state.lock().version = Some(version);
    }

    /// Address the peer accepts connections on, once learned
    pub fn listen_addr(&self) -> Option<PeerAddr> {
        self.state.lock().listen.clone()
    }

    pub(crate) fn set_listen_addr(&self, addr: PeerAddr) {
        self.state.lock().listen = Some(addr);
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Queue an encoded frame. Fails once the peer is closing.
    pub fn send(&self, data: Bytes) -> Result<(), PeerError> {
        let state = self.state.lock();
        if !state.running {
            return Err(PeerError::Closing(self.id));
        }
        self.tx
            .send(Outbound::Frame(data))
            .map_err(|_| PeerError::Closing(self.id))
    }

    /// Stop reading, queue a GOODBYE and let the connection flush and exit.
    /// Returns false if the peer was already closing.
    pub(crate) fn begin_close(&self) -> bool {
        let mut state = self.state.lock();
        if !state.running {
            return false;
        }
        state.running = false;
        if let Ok(goodbye) = Frame::Goodbye.encode() {
            let _ = self.tx.send(Outbound::Frame(goodbye));
        }
        let _ = self.tx.send(Outbound::Close);
        true
    }

    /// Called by the table with the registry lock held
    pub(crate) fn mark_removed(&self) {
        self.state.lock().running = false;
    }
}

/// The I/O side of a peer, owned by its task
pub(crate) struct PeerConnection {
    peer: Arc<Peer>,
    stream: TcpStream,
    rx: mpsc::UnboundedReceiver<Outbound>,
    input: BytesMut,
    inbound: mpsc::UnboundedSender<InboundFrame>,
    table: Arc<PeerTable>,
    cancel: CancellationToken,
}

impl PeerConnection {
    pub(crate) fn new(
        peer: Arc<Peer>,
        stream: TcpStream,
        rx: mpsc::UnboundedReceiver<Outbound>,
        inbound: mpsc::UnboundedSender<InboundFrame>,
        table: Arc<PeerTable>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            peer,
            stream,
            rx,
            input: BytesMut::with_capacity(READ_CHUNK_SIZE),
            inbound,
            table,
            cancel,
        }
    }

    /// Run until the peer closes, the link breaks, or a requested close has
    /// flushed. The task then removes its own peer from the table; nothing
    /// else ever does.
    pub(crate) async fn run(self) {
        let PeerConnection {
            peer,
            mut stream,
            mut rx,
            mut input,
            inbound,
            table,
            cancel,
        } = self;
        let id = peer.id();
        let (mut reader, mut writer) = stream.split();
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        info!(
            "🔄 [{:?}] Peer {} connected ({})",
            peer.direction(),
            id,
            peer.remote_addr()
        );

        loop {
            let reading = peer.is_running();

            tokio::select! {
                biased;

                outbound = rx.recv() => match outbound {
                    Some(Outbound::Frame(data)) => {
                        if let Err(e) = writer.write_all(&data).await {
                            log_io_error(id, "write", &e);
                            break;
                        }
                        trace!("[{}] << {} bytes", id, data.len());
                    }
                    Some(Outbound::Close) | None => {
                        let _ = writer.flush().await;
                        debug!("👋 Peer {} flushed and closing", id);
                        break;
                    }
                },

                result = reader.read(&mut chunk), if reading => match result {
                    Ok(0) => {
                        info!("🔌 [{:?}] Peer {} closed the connection (EOF)", peer.direction(), id);
                        break;
                    }
                    Ok(n) => {
                        trace!("[{}] >> {} bytes", id, n);
                        input.extend_from_slice(&chunk[..n]);
                        process_input(&peer, &mut input, &inbound);
                    }
                    Err(e) => {
                        log_io_error(id, "read", &e);
                        break;
                    }
                },

                _ = cancel.cancelled(), if reading => {
                    peer.begin_close();
                }
            }
        }

        let _ = writer.shutdown().await;
        drop(reader);
        table.remove(id);
        debug!("🔌 Peer {} removed itself from the registry", id);
    }
}

/// Run the framer over the input buffer and route the results.
fn process_input(
    peer: &Peer,
    input: &mut BytesMut,
    inbound: &mpsc::UnboundedSender<InboundFrame>,
) {
    let outcome = wire::parse_frames(input);

    for frame in outcome.frames {
        debug!("📥 [{}] {}", peer.id(), frame.tag_name());
        if inbound
            .send(InboundFrame {
                peer: peer.id(),
                frame,
            })
            .is_err()
        {
            // Dispatch loop is gone; the node is shutting down
            return;
        }
    }

    if let Some(discarded) = outcome.malformed {
        warn!(
            "⚠️ Peer {} sent malformed data, discarded {} bytes",
            peer.id(),
            discarded
        );
        let reply = Frame::Malformed(wire::saturate_u16(discarded));
        if let Ok(data) = reply.encode() {
            let _ = peer.send(data);
        }
    }
}

fn log_io_error(id: PeerId, op: &str, e: &std::io::Error) {
    match e.kind() {
        ErrorKind::BrokenPipe => warn!("❌ Broken pipe with peer {} during {}", id, op),
        ErrorKind::ConnectionReset => warn!("❌ Connection reset by peer {} during {}", id, op),
        _ => warn!("❌ I/O error with peer {} during {}: {}", id, op, e),
    }
}
