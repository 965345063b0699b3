pub mod integration;
pub mod peer_connection;
pub mod registry;
pub mod wire;
