//! Gossip node: networker, message pile, channel subscriptions and inbox
//! behind one handle.
//!
//! Two tasks run per started node. The processor drains network events and
//! feeds decoded messages through [`GossipNode::handle_new_message`], the
//! same path local sends take. The timer vacuums the pile and rebroadcasts
//! one random live message at a rate that grows with the pile.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::config::Config;
use crate::constants::gossip::*;
use crate::error::{AppError, MessageError, PeerError};
use crate::message::{validate_channel, Message, Signature};
use crate::network::peer_connection::PeerId;
use crate::network::registry::{NetworkEvent, Networker, NetworkerConfig};
use crate::network::wire::{Frame, PeerAddr};
use crate::pile::MessagePile;
use crate::storage::{Inbox, InboxRecord, MemoryInbox, SledInbox};

pub type NewMessageCallback = Arc<dyn Fn(&Signature, &InboxRecord) + Send + Sync>;
pub type ChannelCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Seconds until the next rebroadcast for `live` messages in the pile.
///
/// `1 / (live - 0.9)`, clamped to [10 ms, 10 s]. An empty pile reseeds to a
/// random delay in [5, 10) s.
pub fn rebroadcast_interval<R: Rng + ?Sized>(live: usize, rng: &mut R) -> Duration {
    if live == 0 {
        return Duration::from_secs_f64(
            rng.gen_range(IDLE_REBROADCAST_MIN_SECS..IDLE_REBROADCAST_MAX_SECS),
        );
    }
    let secs = 1.0 / (live as f64 - REBROADCAST_OFFSET);
    Duration::from_secs_f64(
        secs.clamp(MIN_REBROADCAST_INTERVAL_SECS, MAX_REBROADCAST_INTERVAL_SECS),
    )
}

#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub vacuum_interval: Duration,
    /// Tuned in before start, without firing callbacks
    pub channels: Vec<String>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            vacuum_interval: Duration::from_secs(DEFAULT_VACUUM_INTERVAL_SECS),
            channels: vec![String::new()],
        }
    }
}

pub struct GossipNode {
    networker: Arc<Networker>,
    pile: Arc<MessagePile>,
    inbox: Arc<dyn Inbox>,
    channels: RwLock<BTreeSet<String>>,
    on_new_message: RwLock<Vec<NewMessageCallback>>,
    on_tune_in: RwLock<Vec<ChannelCallback>>,
    on_tune_out: RwLock<Vec<ChannelCallback>>,
    vacuum_interval: Duration,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GossipNode {
    pub fn new(
        network: NetworkerConfig,
        inbox: Arc<dyn Inbox>,
        settings: NodeSettings,
    ) -> Arc<Self> {
        let channels: BTreeSet<String> = settings
            .channels
            .into_iter()
            .filter(|c| validate_channel(c).is_ok())
            .collect();
        Arc::new(Self {
            networker: Networker::new(network),
            pile: Arc::new(MessagePile::new()),
            inbox,
            channels: RwLock::new(channels),
            on_new_message: RwLock::new(Vec::new()),
            on_tune_in: RwLock::new(Vec::new()),
            on_tune_out: RwLock::new(Vec::new()),
            vacuum_interval: settings.vacuum_interval.max(Duration::from_millis(1)),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Build a node from the daemon configuration, opening the configured
    /// inbox backend.
    pub fn from_config(config: &Config) -> Result<Arc<Self>, AppError> {
        config.validate()?;
        let inbox: Arc<dyn Inbox> = match config.storage.backend.as_str() {
            "sled" => {
                let path = config.storage.resolved_data_dir().join("inbox");
                info!("💾 Opening sled inbox at {}", path.display());
                Arc::new(SledInbox::open(path)?)
            }
            _ => Arc::new(MemoryInbox::new()),
        };
        let settings = NodeSettings {
            vacuum_interval: Duration::from_secs(config.gossip.vacuum_interval_secs),
            channels: config.gossip.channels.clone(),
        };
        Ok(Self::new(NetworkerConfig::from(config), inbox, settings))
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), AppError> {
        let events = self
            .networker
            .take_events()
            .ok_or_else(|| AppError::Network("node already started".to_string()))?;
        self.networker.start().await?;

        let span = info_span!("node", name = %self.networker.config().name);
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(
            self.clone().process_events(events).instrument(span.clone()),
        ));
        tasks.push(tokio::spawn(self.clone().gossip_timer().instrument(span)));
        info!("🚀 Node {} started", self.networker.config().name);
        Ok(())
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        self.networker.stop();
    }

    /// Wait for the engine tasks, then for the networker to drain.
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Node task failed: {}", e);
            }
        }
        self.networker.join().await;
        info!("🛑 Node {} stopped", self.networker.config().name);
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.networker.is_running()
    }

    /// Resolves once the node was asked to stop, locally or remotely
    pub async fn stopped(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.networker.stopped() => {}
        }
    }

    pub async fn peer_add(&self, addr: PeerAddr) -> Result<PeerId, PeerError> {
        self.networker.peer_add(addr).await
    }

    pub fn peer_del(&self, id: PeerId) -> bool {
        self.networker.peer_del(id)
    }

    pub fn peer_count(&self) -> usize {
        self.networker.peer_count()
    }

    pub fn local_listen_addr(&self) -> Option<PeerAddr> {
        self.networker.local_listen_addr()
    }

    /// Build a message, send it to every peer and deliver it locally.
    pub async fn send_message(
        &self,
        channel: &str,
        payload: impl Into<Vec<u8>>,
        ttl: i64,
    ) -> Result<Signature, AppError> {
        let message = Message::new(channel, payload, ttl)?;
        let signature = *message.signature();
        let frame = Frame::Message(Bytes::from(message.encode()?));
        let sent = self.networker.broadcast(&frame)?;
        debug!(
            "📤 Sent message {} on '{}' to {} peer(s)",
            signature.short(),
            channel,
            sent
        );
        self.handle_new_message(message).await;
        Ok(signature)
    }

    /// Shared by local sends and network deliveries. Returns true when the
    /// message was new and alive.
    pub async fn handle_new_message(&self, message: Message) -> bool {
        if !self.pile.add(message.clone()) {
            return false;
        }
        if !self.is_tuned(message.channel()) {
            trace!(
                "Message {} on untuned channel '{}' kept for gossip only",
                message.signature().short(),
                message.channel()
            );
            return true;
        }

        let signature = *message.signature();
        let record = InboxRecord::from(&message);
        if let Err(e) = self.inbox.add(signature, record.clone()).await {
            warn!("Failed to store message {} in inbox: {}", signature.short(), e);
        }
        let callbacks = self.on_new_message.read().clone();
        for callback in callbacks {
            callback(&signature, &record);
        }
        true
    }

    /// Subscribe to a channel. Returns false if already tuned in.
    pub fn tune_in(&self, channel: &str) -> Result<bool, MessageError> {
        validate_channel(channel)?;
        if !self.channels.write().insert(channel.to_string()) {
            return Ok(false);
        }
        info!("📻 Tuned in to '{}'", channel);
        let callbacks = self.on_tune_in.read().clone();
        for callback in callbacks {
            callback(channel);
        }
        Ok(true)
    }

    pub fn tune_out(&self, channel: &str) -> bool {
        if !self.channels.write().remove(channel) {
            return false;
        }
        info!("📻 Tuned out of '{}'", channel);
        let callbacks = self.on_tune_out.read().clone();
        for callback in callbacks {
            callback(channel);
        }
        true
    }

    pub fn is_tuned(&self, channel: &str) -> bool {
        self.channels.read().contains(channel)
    }

    pub fn tuned_channels(&self) -> Vec<String> {
        self.channels.read().iter().cloned().collect()
    }

    pub fn register_on_new_message(
        &self,
        callback: impl Fn(&Signature, &InboxRecord) + Send + Sync + 'static,
    ) {
        self.on_new_message.write().push(Arc::new(callback));
    }

    pub fn register_on_channel_tune_in(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.on_tune_in.write().push(Arc::new(callback));
    }

    pub fn register_on_channel_tune_out(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.on_tune_out.write().push(Arc::new(callback));
    }

    pub fn pile(&self) -> &Arc<MessagePile> {
        &self.pile
    }

    pub fn networker(&self) -> &Arc<Networker> {
        &self.networker
    }

    pub fn inbox(&self) -> &Arc<dyn Inbox> {
        &self.inbox
    }

    async fn process_events(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<NetworkEvent>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.networker.stopped() => {
                    // Remote shutdown: take the rest of the node down too
                    self.stop();
                    break;
                }
                event = events.recv() => match event {
                    Some(NetworkEvent::Message { peer, payload }) => match Message::decode(&payload) {
                        Ok(message) => {
                            self.handle_new_message(message).await;
                        }
                        Err(e) => debug!("Undecodable message from peer {}: {}", peer, e),
                    },
                    Some(NetworkEvent::Ack { peer, length }) => {
                        trace!("Peer {} acked {} bytes", peer, length)
                    }
                    Some(NetworkEvent::Malformed { peer, length }) => {
                        debug!("Peer {} rejected {} bytes as malformed", peer, length)
                    }
                    None => break,
                },
            }
        }
        debug!("Message processor stopped");
    }

    fn next_rebroadcast_delay(&self) -> Duration {
        rebroadcast_interval(self.pile.live_len(), &mut rand::thread_rng())
    }

    async fn gossip_timer(self: Arc<Self>) {
        let mut vacuum = interval_at(Instant::now() + self.vacuum_interval, self.vacuum_interval);
        vacuum.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut next = Instant::now() + self.next_rebroadcast_delay();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = vacuum.tick() => {
                    let removed = self.pile.vacuum();
                    if removed > 0 {
                        debug!("🧹 Vacuumed {} expired message(s)", removed);
                    }
                }
                _ = sleep_until(next) => {
                    self.rebroadcast_once();
                    next = Instant::now() + self.next_rebroadcast_delay();
                }
            }
        }
        debug!("Gossip timer stopped");
    }

    fn rebroadcast_once(&self) {
        let Some(message) = self.pile.get_random() else {
            return;
        };
        let frame = match message.encode() {
            Ok(data) => Frame::Message(Bytes::from(data)),
            Err(e) => {
                warn!("Cannot re-encode message {}: {}", message.signature().short(), e);
                return;
            }
        };
        match self.networker.broadcast(&frame) {
            Ok(sent) => trace!(
                "🔁 Rebroadcast {} to {} peer(s)",
                message.signature().short(),
                sent
            ),
            Err(e) => warn!("Rebroadcast failed: {}", e),
        }
    }
}
