//! # Lockstep Client Library
//!
//! This library provides the client side of a deterministic-lockstep session.
//! A client never predicts or corrects: it only advances its simulation with
//! ticks the server has confirmed, so every peer executes the same inputs in
//! the same order and ends up in the same state.
//!
//! ## Architecture Overview
//!
//! ### Forced Input Latency
//! Inputs are sent `forced_latency_ticks` ahead of the last confirmed tick.
//! While a client runs tick T it has already sent its input for
//! T + latency, which hides the round trip to the server as long as the
//! network keeps up.
//!
//! ### Catch-Up
//! When confirmations arrive late the clock keeps the owed time and runs
//! several ticks in one frame once they arrive, up to
//! `max_ticks_per_frame`.
//!
//! ### Desync Detection
//! Every input carries the hash of the local state it was sampled in. The
//! server compares hashes across peers; a mismatch stops every client in
//! the terminal `Desynced` state.
//!
//! ## Module Organization
//!
//! ### Clock Module (`clock`)
//! Fixed-step scheduler with the `Priming`, `Running` and `Desynced` states.
//!
//! ### Dispatch Module (`dispatch`)
//! FIFO of confirmed tick payloads waiting to be applied.
//!
//! ### Input Module (`input`)
//! Samples one input per tick, attaches the state hash and encodes the
//! submission. Also ships a seeded scripted input source.
//!
//! ### Session Module (`session`)
//! Turns decoded server messages into clock, dispatch and simulation state.
//!
//! ### Network Module (`network`)
//! TCP connection, socket tasks and the per-frame loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::input::ScriptedInput;
//! use client::network::Client;
//! use client::session::ClientSession;
//! use shared::sim::PlatformerSim;
//! use shared::{SessionConfig, SessionContext, StartSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = SessionContext::new(SessionConfig::default(), "[client]")?;
//!     let session = ClientSession::new(
//!         &ctx,
//!         Box::new(|start: &StartSession| PlatformerSim::new(&start.roster, 0)),
//!         ScriptedInput::new(1),
//!     );
//!
//!     let mut client = Client::connect(&ctx, "127.0.0.1:8080", session, 60).await?;
//!
//!     // Play 300 confirmed ticks, then disconnect
//!     client.run(Some(300)).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod dispatch;
pub mod error;
pub mod input;
pub mod network;
pub mod session;

pub use error::ClientError;
