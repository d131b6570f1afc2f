//! RDP-via-guacd protocol adapter.
//!
//! Performs the Guacamole instruction handshake between a connecting client
//! and a guacd backend, then hands both raw connections to the splice core
//! for opaque byte copying.

pub mod connection;
pub mod handshake;

pub use connection::{Direction, GuacamoleConnection, HandoffConnection, LeftoverReader};
pub use handshake::{negotiate, passthrough, HandshakeError, NegotiationSettings, SplicedConnections};
