use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Codec and field-validation failures for application messages.
///
/// Each field has its own variant so callers can tell exactly which one was
/// rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("Invalid timestamp: {0} is negative")]
    InvalidTimestamp(i64),

    #[error("Invalid TTL: {0} is outside [60, 223200]")]
    InvalidTtl(i64),

    #[error("Invalid channel: {0} bytes exceeds 255")]
    InvalidChannel(usize),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Malformed message data: {0}")]
    Malformed(String),

    #[error("Encoded message too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Frame payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Address too long: {0} bytes (max: 255)")]
    AddressTooLong(usize),
}

/// Non-fatal outcomes of registry operations
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Networker is not running")]
    NotRunning,

    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    #[error("Peer table is full ({0} peers)")]
    TooManyPeers(usize),

    #[error("Failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("Unknown peer id {0}")]
    UnknownPeer(usize),

    #[error("Peer {0} is closing")]
    Closing(usize),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to open {name} database: {source}")]
    DatabaseOpen {
        name: String,
        #[source]
        source: sled::Error,
    },

    #[error("Database operation failed: {0}")]
    DatabaseOp(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}
