//! Global constants for the murmur gossip transport
//!
//! Centralizes the protocol magic numbers and the timing defaults so the
//! codec, the framer and the engine agree on them.

/// Application message layout and validation bounds
pub mod message {
    /// Width of the message signature (SHA-512 digest)
    pub const SIGNATURE_LEN: usize = 64;

    /// signature + timestamp (8) + ttl (4) + channel length (1)
    pub const HEADER_LEN: usize = SIGNATURE_LEN + 8 + 4 + 1;

    /// Shortest accepted time-to-live, in seconds
    pub const MIN_TTL: u32 = 60;

    /// Longest accepted time-to-live, in seconds (62 hours)
    pub const MAX_TTL: u32 = 223_200;

    /// Channel names are length-prefixed with a single byte
    pub const MAX_CHANNEL_LEN: usize = 255;

    /// Payloads (and whole encoded messages) must fit a 3-byte length field
    pub const MAX_PAYLOAD_LEN: usize = (1 << 24) - 1;

    /// Mixed into every signature digest
    pub const SIGNATURE_SALT: &[u8] = b"murmur/usig/v1";
}

/// Wire protocol constants
pub mod wire {
    pub const HELLO: u8 = 1;
    pub const GOODBYE: u8 = 2;
    pub const SHAREPEER: u8 = 3;
    pub const REQUESTPEER: u8 = 4;
    pub const MESSAGE: u8 = 5;
    pub const MESSAGEACK: u8 = 6;
    pub const MALFORMED: u8 = 7;
    pub const ADVERTISE: u8 = 8;

    /// Version announced in our HELLO frame
    pub const PROTOCOL_VERSION: u8 = 3;

    /// Address fields this short cannot hold a real host and are dropped
    pub const MIN_SHARED_ADDR_LEN: usize = 3;

    /// Legacy remote-stop command. Honoured only when explicitly enabled.
    pub const SHUTDOWN_SENTINEL: &[u8; 56] =
        b"What is love? Baby don't hurt me, don't hurt me, no more";

    /// Maximum number of bytes pulled off a socket per read
    pub const READ_CHUNK_SIZE: usize = 1024;
}

/// Topology maintenance defaults
pub mod integration {
    /// Below this many peers a node is under-integrated
    pub const DEFAULT_MIN_INTEGRATION: usize = 5;

    /// Hard cap on simultaneous peer connections
    pub const DEFAULT_MAX_CLIENTS: usize = 50;

    /// Urgent REQUESTPEER cooldown is drawn from [MIN, MAX) seconds
    pub const URGENT_COOLDOWN_MIN_SECS: f64 = 2.0;
    pub const URGENT_COOLDOWN_MAX_SECS: f64 = 5.0;

    /// Opportunistic cooldown tends towards this as the node fills up
    pub const OPPORTUNISTIC_COOLDOWN_CEILING_SECS: f64 = 100.0;

    /// Dispatch loop wake-up period when no frames arrive
    pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;

    /// Outbound connect attempts give up after this long
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

    /// A candidate is forgotten after this many failed dials in a row
    pub const MAX_DIAL_FAILURES: u32 = 3;
}

/// Gossip engine timing
pub mod gossip {
    pub const DEFAULT_VACUUM_INTERVAL_SECS: u64 = 5;

    /// Rebroadcast interval is 1 / (N - OFFSET) seconds for N live messages
    pub const REBROADCAST_OFFSET: f64 = 0.9;

    /// Clamp bounds for the rebroadcast interval
    pub const MIN_REBROADCAST_INTERVAL_SECS: f64 = 0.01;
    pub const MAX_REBROADCAST_INTERVAL_SECS: f64 = 10.0;

    /// Idle reseed range used while the pile is empty
    pub const IDLE_REBROADCAST_MIN_SECS: f64 = 5.0;
    pub const IDLE_REBROADCAST_MAX_SECS: f64 = 10.0;
}
