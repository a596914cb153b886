//! # Shared Lockstep Library
//!
//! Types and building blocks used by both the authoritative server and the
//! clients of a deterministic-lockstep session.
//!
//! ## Module Organization
//!
//! ### Protocol Module (`protocol`)
//! The fixed message catalog and its byte-level codec:
//! - One-byte message id followed by a fixed-layout, big-endian payload
//! - Streaming decoder for reliable, ordered byte streams
//!
//! ### Hash Module (`hash`)
//! Deterministic state hashing. State is split into independent shards that
//! are hashed in parallel and combined with a commutative combiner, so every
//! peer produces the same value regardless of thread count.
//!
//! ### Config Module (`config`)
//! Session configuration, tick rate parameters and the session context that
//! is handed to every component at construction.
//!
//! ### Error Module (`error`)
//! The error taxonomy shared by server and client.
//!
//! ### Sim Module (`sim`)
//! A small integer-only platformer used by the binaries and tests as the
//! simulation collaborator.
//!
//! ### Transport Module (`transport`)
//! Stream writer task that applies the simulated network impairment knobs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

pub mod config;
pub mod error;
pub mod hash;
pub mod protocol;
pub mod sim;
pub mod transport;

pub use config::{ImpairmentConfig, SessionConfig, SessionContext, TickRateConfig};
pub use error::{
    ConfigError, DesyncError, DuplicateSubmissionError, PeerDisconnected, ProtocolError,
    RosterOverflowError,
};
pub use protocol::{ClientTickSubmit, FrameDecoder, Message, StartSession};

/// One fixed simulation step. The first simulated tick is 1.
pub type Tick = u32;

/// Identifier assigned to a peer when the session starts.
pub type NetworkId = u32;

/// Application-defined per-tick input.
///
/// Any serde type made only of fixed-size fields qualifies; it travels on the
/// wire through the fixed-int bincode options in [`protocol`].
pub trait TickInput:
    Serialize + DeserializeOwned + Clone + Debug + Default + PartialEq + Send + 'static
{
}

impl<T> TickInput for T where
    T: Serialize + DeserializeOwned + Clone + Debug + Default + PartialEq + Send + 'static
{
}

/// The canonical broadcast for one tick.
///
/// `network_ids` is sorted ascending and `inputs[i]` belongs to
/// `network_ids[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedTickPayload<I> {
    pub tick: Tick,
    pub network_ids: Vec<NetworkId>,
    pub inputs: Vec<I>,
    pub desynced: bool,
}

impl<I: Clone> ConfirmedTickPayload<I> {
    /// Pairs every input with the peer that submitted it.
    pub fn entries(&self) -> Vec<(NetworkId, I)> {
        self.network_ids
            .iter()
            .copied()
            .zip(self.inputs.iter().cloned())
            .collect()
    }
}

/// The game simulation driven by the tick clock.
///
/// Implementations must be deterministic: the same sequence of
/// `apply_tick` calls yields the same `state_hash` on every machine.
pub trait Simulation {
    type Input: TickInput;

    /// Advances the simulation by exactly one tick using every peer's input.
    fn apply_tick(&mut self, tick: Tick, inputs: &[(NetworkId, Self::Input)]);

    /// Hash of the current simulation state.
    fn state_hash(&self) -> u64;
}

/// Produces the local player's input for a tick.
pub trait InputSource<I> {
    fn sample(&mut self, tick: Tick) -> I;
}
