//! Error taxonomy shared by the server and the clients.
//!
//! Only [`DesyncError`] is fatal to a session. Protocol errors are recovered
//! locally by dropping the offending message, roster errors are rejected at
//! the connection boundary and a disconnect merely shrinks the roster.

use crate::{NetworkId, Tick};
use std::collections::BTreeMap;
use thiserror::Error;

/// Malformed or unsupported bytes on the wire.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown message id {0:#04x}")]
    UnknownMessageId(u8),

    /// Not enough bytes buffered for a complete message yet.
    #[error("incomplete message")]
    Incomplete,

    #[error("field `{field}` out of range: {value}")]
    FieldOutOfRange { field: &'static str, value: i64 },

    #[error("invalid desynced flag {0}")]
    InvalidFlag(u8),

    #[error("payload encoding failed: {0}")]
    Payload(#[from] bincode::Error),
}

/// A peer submitted a second input for a tick it already contributed to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("peer {network_id} already submitted input for tick {tick}")]
pub struct DuplicateSubmissionError {
    pub network_id: NetworkId,
    pub tick: Tick,
}

/// A connection arrived after the roster was full or the session had started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("roster closed ({connected}/{capacity} connected, started: {started})")]
pub struct RosterOverflowError {
    pub connected: usize,
    pub capacity: usize,
    pub started: bool,
}

/// Peers disagree about the simulation state. Terminal for the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("desync detected at tick {tick:?}")]
pub struct DesyncError {
    /// The tick whose hashes diverged, when known to the reporter.
    pub tick: Option<Tick>,
    pub hashes: BTreeMap<NetworkId, u64>,
}

impl DesyncError {
    /// Desync reported by the server without hash details.
    pub fn notice() -> Self {
        Self {
            tick: None,
            hashes: BTreeMap::new(),
        }
    }
}

/// A roster member went away. Not fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("peer {network_id} disconnected")]
pub struct PeerDisconnected {
    pub network_id: NetworkId,
}

/// Rejected session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("tick rate must be positive")]
    ZeroTickRate,

    #[error("forced latency must be at least one tick")]
    ZeroForcedLatency,

    #[error("max ticks per frame must be positive")]
    ZeroMaxTicksPerFrame,

    #[error("max connections must be positive")]
    ZeroMaxConnections,

    #[error("max connections {value} exceeds the roster limit {limit}")]
    TooManyConnections { value: u16, limit: usize },

    #[error("{name} must be a percentage, got {value}")]
    InvalidPercentage { name: &'static str, value: u8 },
}
