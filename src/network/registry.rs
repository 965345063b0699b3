//! Connection registry ("networker").
//!
//! Owns the optional listener, the peer table, the candidate address list
//! and the single dispatch loop that interprets every inbound frame. The
//! integration controller runs on the same loop, once per tick; the dials it
//! asks for run on a separate task, at most one at a time.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument, Span};

use crate::config::Config;
use crate::constants::integration::*;
use crate::constants::wire::PROTOCOL_VERSION;
use crate::error::{AppError, PeerError};
use crate::network::integration::{IntegrationAction, IntegrationController};
use crate::network::peer_connection::{
    ConnectionDirection, InboundFrame, Peer, PeerConnection, PeerId,
};
use crate::network::wire::{saturate_u16, Frame, PeerAddr};

/// Hosts that always mean "this machine" when paired with our own port
const LOOPBACK_HOSTS: [&str; 4] = ["127.0.0.1", "localhost", "0.0.0.0", "::1"];

/// A candidate dial finished off the dispatch loop
#[derive(Debug)]
struct DialOutcome {
    addr: PeerAddr,
    result: Result<PeerId, PeerError>,
}

/// Everything the dispatch loop surfaces to the layer above
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// Payload of a MESSAGE frame, still encoded
    Message { peer: PeerId, payload: Bytes },
    Ack { peer: PeerId, length: u16 },
    Malformed { peer: PeerId, length: u16 },
}

#[derive(Debug, Clone)]
pub struct NetworkerConfig {
    /// Used in log spans only
    pub name: String,
    pub bind_host: String,
    /// 0 picks an ephemeral port
    pub port: u16,
    /// False gives a connect-only node
    pub listen: bool,
    /// Host other peers reach us on, when known
    pub external_host: Option<String>,
    pub min_integration: usize,
    pub max_clients: usize,
    pub tick_interval: Duration,
    pub connect_timeout: Duration,
    pub allow_remote_shutdown: bool,
}

impl Default for NetworkerConfig {
    fn default() -> Self {
        Self {
            name: "murmur".to_string(),
            bind_host: "0.0.0.0".to_string(),
            port: 0,
            listen: true,
            external_host: None,
            min_integration: DEFAULT_MIN_INTEGRATION,
            max_clients: DEFAULT_MAX_CLIENTS,
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            allow_remote_shutdown: false,
        }
    }
}

impl From<&Config> for NetworkerConfig {
    fn from(config: &Config) -> Self {
        let network = &config.network;
        Self {
            name: config.node.name.clone(),
            bind_host: network.listen_address.clone(),
            port: network.port,
            listen: network.listen,
            external_host: network.external_address.clone().filter(|h| !h.is_empty()),
            min_integration: network.min_integration,
            max_clients: network.max_clients,
            tick_interval: Duration::from_millis(network.tick_interval_ms.max(1)),
            connect_timeout: Duration::from_secs(network.connect_timeout_secs.max(1)),
            allow_remote_shutdown: network.allow_remote_shutdown,
        }
    }
}

/// Map of live peers. Ids are the lowest free integers; only a peer's own
/// connection task removes it.
pub struct PeerTable {
    peers: RwLock<HashMap<PeerId, Arc<Peer>>>,
    count_tx: watch::Sender<usize>,
}

impl PeerTable {
    pub fn new() -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            peers: RwLock::new(HashMap::new()),
            count_tx,
        }
    }

    /// Register a peer under the lowest free id. With `listen` set, refuses
    /// a second link to the same listen address.
    pub(crate) fn insert(
        &self,
        listen: Option<&PeerAddr>,
        max: usize,
        make: impl FnOnce(PeerId) -> Arc<Peer>,
    ) -> Result<Arc<Peer>, PeerError> {
        let mut peers = self.peers.write();
        if peers.len() >= max {
            return Err(PeerError::TooManyPeers(peers.len()));
        }
        if let Some(addr) = listen {
            if peers.values().any(|p| p.listen_addr().as_ref() == Some(addr)) {
                return Err(PeerError::AlreadyConnected(addr.to_string()));
            }
        }
        let id = (0..).find(|id| !peers.contains_key(id)).unwrap_or(peers.len());
        let peer = make(id);
        peers.insert(id, peer.clone());
        self.count_tx.send_replace(peers.len());
        Ok(peer)
    }

    /// Registry lock first, then the peer's own lock.
    pub(crate) fn remove(&self, id: PeerId) -> Option<Arc<Peer>> {
        let mut peers = self.peers.write();
        let removed = peers.remove(&id);
        if let Some(peer) = &removed {
            peer.mark_removed();
        }
        self.count_tx.send_replace(peers.len());
        removed
    }

    pub fn get(&self, id: PeerId) -> Option<Arc<Peer>> {
        self.peers.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.read().values().cloned().collect()
    }

    pub fn listen_addrs(&self) -> Vec<PeerAddr> {
        self.peers
            .read()
            .values()
            .filter_map(|p| p.listen_addr())
            .collect()
    }

    /// Watch the live peer count; used to wait for the table to drain
    pub fn subscribe_count(&self) -> watch::Receiver<usize> {
        self.count_tx.subscribe()
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Networker {
    config: NetworkerConfig,
    table: Arc<PeerTable>,
    /// Oldest first; holds at most `max_clients` entries
    candidates: Mutex<VecDeque<PeerAddr>>,
    integrated: AtomicBool,
    running: AtomicBool,
    local_port: RwLock<Option<u16>>,
    inbound_tx: mpsc::UnboundedSender<InboundFrame>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundFrame>>>,
    events_tx: mpsc::UnboundedSender<NetworkEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<NetworkEvent>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Networker {
    pub fn new(config: NetworkerConfig) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            config,
            table: Arc::new(PeerTable::new()),
            candidates: Mutex::new(VecDeque::new()),
            integrated: AtomicBool::new(false),
            running: AtomicBool::new(false),
            local_port: RwLock::new(None),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &NetworkerConfig {
        &self.config
    }

    /// Bind the listener (if any) and spawn the listener and dispatch tasks.
    /// Bind errors surface here, before anything runs.
    pub async fn start(self: &Arc<Self>) -> Result<(), AppError> {
        let inbound_rx = self
            .inbound_rx
            .lock()
            .take()
            .ok_or_else(|| AppError::Network("networker already started".to_string()))?;

        let span = info_span!("node", name = %self.config.name);

        let listener = if self.config.listen {
            let listener =
                TcpListener::bind((self.config.bind_host.as_str(), self.config.port)).await?;
            let port = listener.local_addr()?.port();
            *self.local_port.write() = Some(port);
            info!(parent: &span, "📡 Listening on {}:{}", self.config.bind_host, port);
            Some(listener)
        } else {
            info!(parent: &span, "📡 Running connect-only (no listener)");
            None
        };

        self.running.store(true, Ordering::SeqCst);

        let mut tasks = self.tasks.lock();
        if let Some(listener) = listener {
            let this = self.clone();
            tasks.push(tokio::spawn(
                this.listen_loop(listener).instrument(span.clone()),
            ));
        }
        let this = self.clone();
        tasks.push(tokio::spawn(
            this.dispatch_loop(inbound_rx).instrument(span),
        ));
        Ok(())
    }

    /// Cooperative: tasks observe the token on their next wake-up.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("🛑 Networker {} stopping", self.config.name);
        }
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolves once `stop` was called (locally or by a remote sentinel)
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }

    /// Wait for the listener and dispatch tasks, then for every peer to
    /// remove itself. No timeout: a peer that never drains stalls this.
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Networker task failed: {}", e);
            }
        }
        let mut count = self.table.subscribe_count();
        let _ = count.wait_for(|n| *n == 0).await;
        debug!("Networker {} joined", self.config.name);
    }

    /// Application-level events; can be taken once
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<NetworkEvent>> {
        self.events_rx.lock().take()
    }

    pub fn local_port(&self) -> Option<u16> {
        *self.local_port.read()
    }

    /// Our own listen address as other peers should dial it
    pub fn local_listen_addr(&self) -> Option<PeerAddr> {
        let port = self.local_port()?;
        let host = self
            .config
            .external_host
            .clone()
            .unwrap_or_else(|| "127.0.0.1".to_string());
        Some(PeerAddr::new(host, port))
    }

    pub fn table(&self) -> &Arc<PeerTable> {
        &self.table
    }

    pub fn peer_count(&self) -> usize {
        self.table.len()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.table.ids()
    }

    pub fn peer(&self, id: PeerId) -> Option<Arc<Peer>> {
        self.table.get(id)
    }

    pub fn candidates(&self) -> Vec<PeerAddr> {
        self.candidates.lock().iter().cloned().collect()
    }

    pub fn is_integrated(&self) -> bool {
        self.integrated.load(Ordering::SeqCst)
    }

    fn is_self(&self, addr: &PeerAddr) -> bool {
        let Some(port) = self.local_port() else {
            return false;
        };
        addr.port == port
            && (LOOPBACK_HOSTS.contains(&addr.host.as_str())
                || addr.host == self.config.bind_host
                || self.config.external_host.as_deref() == Some(addr.host.as_str()))
    }

    fn is_already_peer(&self, addr: &PeerAddr) -> bool {
        self.is_self(addr) || self.table.listen_addrs().contains(addr)
    }

    /// Ourselves, a connected peer's listen address, or a candidate
    pub fn is_known(&self, addr: &PeerAddr) -> bool {
        // Table lock is taken and released before the candidate lock
        self.is_already_peer(addr) || self.candidates.lock().contains(addr)
    }

    /// Record an address learned from the network, unless already known.
    /// When the list is full the oldest candidate makes room.
    pub fn add_candidate(&self, addr: PeerAddr) -> bool {
        if self.is_already_peer(&addr) {
            return false;
        }
        let capacity = self.config.max_clients.max(1);
        let mut candidates = self.candidates.lock();
        if candidates.contains(&addr) {
            return false;
        }
        while candidates.len() >= capacity {
            if let Some(evicted) = candidates.pop_front() {
                trace!("Candidate list full, forgetting {}", evicted);
            }
        }
        debug!("📇 New candidate peer {}", addr);
        candidates.push_back(addr);
        true
    }

    fn remove_candidate(&self, addr: &PeerAddr) {
        self.candidates.lock().retain(|c| c != addr);
    }

    /// Dial `addr` and register it. Every failure is non-fatal.
    pub async fn peer_add(self: &Arc<Self>, addr: PeerAddr) -> Result<PeerId, PeerError> {
        if !self.is_running() {
            return Err(PeerError::NotRunning);
        }
        if self.is_already_peer(&addr) {
            warn!("Will not add peer {}: already connected", addr);
            return Err(PeerError::AlreadyConnected(addr.to_string()));
        }
        if self.table.len() >= self.config.max_clients {
            return Err(PeerError::TooManyPeers(self.table.len()));
        }

        let stream = match timeout(
            self.config.connect_timeout,
            TcpStream::connect((addr.host.as_str(), addr.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("Will not add peer {}: couldn't connect ({})", addr, e);
                return Err(PeerError::Connect {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!("Will not add peer {}: connect timed out", addr);
                return Err(PeerError::Connect {
                    addr: addr.to_string(),
                    reason: "timed out".to_string(),
                });
            }
        };

        let peer = self.register(stream, ConnectionDirection::Outbound, Some(addr))?;
        if let Some(port) = self.local_port() {
            let advertise = Frame::Advertise {
                host: String::new(),
                port,
            };
            self.send_frame(&peer, &advertise)?;
        }
        Ok(peer.id())
    }

    /// Register an already-accepted socket. Inbound peers do not get an
    /// ADVERTISE; they learn our address from the link itself.
    pub fn peer_attach(self: &Arc<Self>, stream: TcpStream) -> Result<PeerId, PeerError> {
        if !self.is_running() {
            return Err(PeerError::NotRunning);
        }
        Ok(self
            .register(stream, ConnectionDirection::Inbound, None)?
            .id())
    }

    fn register(
        self: &Arc<Self>,
        stream: TcpStream,
        direction: ConnectionDirection,
        listen: Option<PeerAddr>,
    ) -> Result<Arc<Peer>, PeerError> {
        let remote = stream.peer_addr().map_err(|e| PeerError::Connect {
            addr: listen
                .as_ref()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "inbound".to_string()),
            reason: e.to_string(),
        })?;

        if !self.is_running() {
            return Err(PeerError::NotRunning);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = self
            .table
            .insert(listen.as_ref(), self.config.max_clients, |id| {
                Arc::new(Peer::new(id, remote, direction, tx, listen.clone()))
            })?;

        self.send_frame(
            &peer,
            &Frame::Hello {
                version: PROTOCOL_VERSION,
            },
        )?;

        let conn = PeerConnection::new(
            peer.clone(),
            stream,
            rx,
            self.inbound_tx.clone(),
            self.table.clone(),
            self.cancel.child_token(),
        );
        let span = info_span!("peer", node = %self.config.name, id = peer.id());
        tokio::spawn(conn.run().instrument(span));

        info!(
            "✅ Added peer {} ({:?}, {})",
            peer.id(),
            direction,
            remote
        );
        Ok(peer)
    }

    /// Ask a peer to leave: stop reading, send GOODBYE, close once flushed.
    pub fn peer_del(&self, id: PeerId) -> bool {
        match self.table.get(id) {
            Some(peer) => {
                if peer.begin_close() {
                    debug!("Peer {} scheduled for deletion", id);
                }
                true
            }
            None => false,
        }
    }

    fn send_frame(&self, peer: &Peer, frame: &Frame) -> Result<(), PeerError> {
        peer.send(frame.encode()?)
    }

    pub fn send_to(&self, id: PeerId, frame: &Frame) -> Result<(), PeerError> {
        let peer = self.table.get(id).ok_or(PeerError::UnknownPeer(id))?;
        self.send_frame(&peer, frame)
    }

    /// Queue one frame for every running peer. Encodes once.
    pub fn broadcast(&self, frame: &Frame) -> Result<usize, PeerError> {
        let data = frame.encode()?;
        let mut sent = 0;
        for peer in self.table.snapshot() {
            if peer.send(data.clone()).is_ok() {
                sent += 1;
            }
        }
        trace!("📡 Broadcast {} to {} peer(s)", frame.tag_name(), sent);
        Ok(sent)
    }

    async fn listen_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Listener ready");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        if self.table.len() >= self.config.max_clients {
                            warn!("🚫 Refusing {}: peer table full", addr);
                            continue;
                        }
                        if let Err(e) = self.peer_attach(stream) {
                            warn!("Failed to register inbound {}: {}", addr, e);
                        }
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
            }
        }
        debug!("Listener stopped");
    }

    async fn dispatch_loop(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<InboundFrame>) {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut controller =
            IntegrationController::new(self.config.min_integration, self.config.max_clients);
        let mut last = Instant::now();

        // Candidate dials run on their own task, one at a time
        let (dial_tx, mut dial_rx) = mpsc::unbounded_channel::<DialOutcome>();
        let mut dialing = false;
        let mut failures: HashMap<PeerAddr, u32> = HashMap::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = inbound.recv() => match received {
                    Some(frame) => self.handle_frame(frame),
                    None => break,
                },
                Some(outcome) = dial_rx.recv() => {
                    dialing = false;
                    self.dial_finished(&mut controller, &mut failures, outcome);
                }
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            let elapsed = now.duration_since(last);
            last = now;
            if self.integrate(&mut controller, elapsed, dialing, &dial_tx) {
                dialing = true;
            }
        }

        // Summon every peer for deletion; each removes itself once flushed
        for id in self.table.ids() {
            self.peer_del(id);
        }
        debug!("Dispatch loop stopped");
    }

    /// Run one controller tick. Returns true when a dial was started.
    fn integrate(
        self: &Arc<Self>,
        controller: &mut IntegrationController,
        elapsed: Duration,
        dialing: bool,
        dial_tx: &mpsc::UnboundedSender<DialOutcome>,
    ) -> bool {
        let peers = self.table.ids();
        // Hide candidates while a dial is in flight so no second one starts
        let candidates = if dialing {
            Vec::new()
        } else {
            self.candidates()
        };
        let action = {
            let mut rng = rand::thread_rng();
            controller.tick(elapsed, &peers, &candidates, &mut rng)
        };
        self.integrated
            .store(controller.is_integrated(), Ordering::SeqCst);

        match action {
            IntegrationAction::Idle => false,
            IntegrationAction::Connect(addr) => {
                self.spawn_dial(addr, dial_tx.clone());
                true
            }
            IntegrationAction::RequestPeers(id) => {
                debug!("🙋 Requesting peers from {}", id);
                if let Err(e) = self.send_to(id, &Frame::RequestPeer) {
                    debug!("REQUESTPEER to {} failed: {}", id, e);
                }
                false
            }
        }
    }

    fn spawn_dial(self: &Arc<Self>, addr: PeerAddr, done: mpsc::UnboundedSender<DialOutcome>) {
        let this = self.clone();
        let dial = async move {
            let result = tokio::select! {
                _ = this.cancel.cancelled() => Err(PeerError::NotRunning),
                result = this.peer_add(addr.clone()) => result,
            };
            let _ = done.send(DialOutcome { addr, result });
        };
        tokio::spawn(dial.instrument(Span::current()));
    }

    fn dial_finished(
        &self,
        controller: &mut IntegrationController,
        failures: &mut HashMap<PeerAddr, u32>,
        outcome: DialOutcome,
    ) {
        let DialOutcome { addr, result } = outcome;
        match result {
            Ok(id) => {
                debug!("🔗 Integrated candidate {} as peer {}", addr, id);
                self.remove_candidate(&addr);
                failures.remove(&addr);
            }
            Err(PeerError::AlreadyConnected(_)) => {
                self.remove_candidate(&addr);
                failures.remove(&addr);
            }
            Err(PeerError::NotRunning) => {}
            Err(e) => {
                debug!("Candidate {} not reachable: {}", addr, e);
                controller.connect_failed();
                let count = failures.entry(addr.clone()).or_insert(0);
                *count += 1;
                if *count >= MAX_DIAL_FAILURES {
                    debug!("Forgetting candidate {} after {} failed dials", addr, count);
                    failures.remove(&addr);
                    self.remove_candidate(&addr);
                }
            }
        }
        // Drop counters for candidates that left the list some other way
        let candidates = self.candidates.lock();
        failures.retain(|a, _| candidates.contains(a));
    }

    fn handle_frame(&self, inbound: InboundFrame) {
        let InboundFrame { peer: pid, frame } = inbound;
        let Some(peer) = self.table.get(pid) else {
            trace!("Frame {} from departed peer {}", frame.tag_name(), pid);
            return;
        };

        match frame {
            Frame::Hello { version } => {
                peer.set_version(version);
                debug!("Peer {} is running version {}", pid, version);
            }
            Frame::Goodbye => {
                self.peer_del(pid);
            }
            Frame::SharePeer(addr) => {
                self.add_candidate(addr);
            }
            Frame::RequestPeer => {
                if !self.is_running() {
                    return;
                }
                let choices: Vec<PeerAddr> = self
                    .table
                    .snapshot()
                    .into_iter()
                    .filter(|p| p.id() != pid && p.is_running())
                    .filter_map(|p| p.listen_addr())
                    .collect();
                let choice = choices.choose(&mut rand::thread_rng()).cloned();
                match choice {
                    Some(addr) => {
                        debug!("Sharing {} with peer {}", addr, pid);
                        let _ = self.send_frame(&peer, &Frame::SharePeer(addr));
                    }
                    None => trace!("No address to share with peer {}", pid),
                }
            }
            Frame::Message(payload) => {
                let length = saturate_u16(payload.len());
                debug!("📨 Received {} byte message from {}", payload.len(), pid);
                let _ = self.events_tx.send(NetworkEvent::Message { peer: pid, payload });
                let _ = self.send_frame(&peer, &Frame::MessageAck(length));
            }
            Frame::MessageAck(length) => {
                trace!("Peer {} acknowledged {} bytes", pid, length);
                let _ = self.events_tx.send(NetworkEvent::Ack { peer: pid, length });
            }
            Frame::Malformed(length) => {
                warn!("⚠️ Peer {} reported {} malformed bytes from us", pid, length);
                let _ = self
                    .events_tx
                    .send(NetworkEvent::Malformed { peer: pid, length });
            }
            Frame::Advertise { host, port } => {
                let host = if host.is_empty() {
                    peer.remote_addr().ip().to_string()
                } else {
                    host
                };
                let listen = PeerAddr::new(host, port);
                let duplicate = self
                    .table
                    .snapshot()
                    .iter()
                    .any(|p| p.id() != pid && p.listen_addr().as_ref() == Some(&listen));
                if duplicate || self.is_self(&listen) {
                    info!("✂️ Dropping peer {}: already linked to {}", pid, listen);
                    self.peer_del(pid);
                    return;
                }
                info!("Peer {}'s listen address is {}", pid, listen);
                peer.set_listen_addr(listen.clone());
                self.remove_candidate(&listen);
            }
            Frame::Shutdown => {
                if self.config.allow_remote_shutdown {
                    warn!("☠️ Remote shutdown sentinel from peer {}: stopping", pid);
                    self.stop();
                } else {
                    warn!(
                        "🚫 Ignoring remote shutdown sentinel from peer {} (allow_remote_shutdown = false)",
                        pid
                    );
                }
            }
        }
    }
}
