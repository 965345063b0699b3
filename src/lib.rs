//! Murmur: a peer-to-peer gossip transport.
//!
//! Nodes exchange small, signed, time-bounded messages over raw TCP links
//! using a tag-prefixed binary framing protocol, and keep themselves
//! connected to the rest of the network without a central broker.

pub mod config;
pub mod constants;
pub mod error;
pub mod message;
pub mod network;
pub mod node;
pub mod pile;
pub mod shutdown;
pub mod storage;

pub use error::{AppError, MessageError, PeerError, StorageError, WireError};
pub use message::{Message, Signature};
pub use network::registry::{NetworkEvent, Networker, NetworkerConfig};
pub use network::wire::{Frame, PeerAddr};
pub use node::{GossipNode, NodeSettings};
pub use pile::MessagePile;
pub use storage::{Inbox, InboxRecord, MemoryInbox, SledInbox};
