//! # Lockstep Relay Server Library
//!
//! This library provides the authoritative relay for a deterministic-lockstep
//! session. The server never simulates anything itself: it collects one input
//! per peer per tick, releases each tick once the whole live roster has
//! contributed, and compares the state hashes peers attach to their inputs.
//!
//! ## Core Responsibilities
//!
//! ### Roster Management
//! Handles the lifecycle of peer connections:
//! - Admission into the lobby, bounded by `max_connections`
//! - Network id assignment (1..=n, in accept order) when the session starts
//! - Marking roster members dead when they disconnect
//!
//! ### Tick Aggregation
//! Buffers `(tick, input, hash)` submissions and releases complete ticks in
//! strictly increasing order as a `ConfirmedTickPayload`, so every client
//! applies exactly the same inputs for exactly the same tick.
//!
//! ### Desync Detection
//! Compares every hash of a released tick against the first one received.
//! A mismatch is broadcast, followed by a `DesyncNotice`, and the session
//! halts for good.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! Socket tasks decode bytes into messages and forward them over an mpsc
//! channel. One loop owns the session, registry and aggregator, so no
//! session state is ever shared between tasks.
//!
//! ### Pure Session State Machine
//! [`session::Session`] takes decoded messages and returns the outbound
//! actions to perform. The network layer only executes them, which keeps the
//! whole protocol testable without sockets.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! Fixed-capacity table of peer slots (network id, connection, liveness).
//!
//! ### Aggregator Module (`aggregator`)
//! Per-tick input buffering, in-order release and hash comparison.
//!
//! ### Session Module (`session`)
//! Lobby, start-of-game broadcast, routing and disconnect handling.
//!
//! ### Network Module (`network`)
//! TCP accept loop, per-connection reader and writer tasks, lobby timeout.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use shared::sim::PlayerInput;
//! use shared::{SessionConfig, SessionContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = SessionContext::new(SessionConfig::default(), "[server]")?;
//!     let mut server = Server::<PlayerInput>::bind(ctx, "127.0.0.1:8080").await?;
//!
//!     // Runs until every roster member has left a started session
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod network;
pub mod registry;
pub mod session;
