//! Session orchestration on the server
//!
//! The session owns the connection registry and, once started, the input
//! aggregator. It is a pure state machine: every call returns the list of
//! [`Outbound`] actions the transport has to carry out, so the same code runs
//! behind TCP sockets and in-memory tests.
//!
//! Lifecycle: `Lobby` admits connections until the roster is full (or the
//! caller triggers [`Session::start`] after a lobby timeout). `Running`
//! routes tick submissions and broadcasts released ticks. `Halted` is entered
//! after a desync and is terminal.

use crate::aggregator::{DesyncRecord, InputAggregator, SubmissionError};
use crate::registry::ConnectionRegistry;
use log::{debug, error, info, warn};
use shared::{
    ConfirmedTickPayload, Message, NetworkId, RosterOverflowError, SessionContext, StartSession,
    TickInput,
};
use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Lobby,
    Running,
    Halted,
}

/// Action requested from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound<C, I> {
    Send { to: C, message: Message<I> },
    Close { to: C },
}

pub struct Session<C, I> {
    ctx: SessionContext,
    registry: ConnectionRegistry<C>,
    aggregator: Option<InputAggregator<I>>,
    state: SessionState,
}

impl<C: Copy + Eq + Debug, I: TickInput> Session<C, I> {
    pub fn new(ctx: &SessionContext) -> Self {
        Self {
            registry: ConnectionRegistry::new(ctx.config.max_connections as usize),
            ctx: ctx.clone(),
            aggregator: None,
            state: SessionState::Lobby,
        }
    }

    /// Admits a new connection, starting the session once the roster is full.
    ///
    /// A refused connection must be closed by the caller.
    pub fn accept(&mut self, connection: C) -> Result<Vec<Outbound<C, I>>, RosterOverflowError> {
        let position = self.registry.admit(connection)?;
        info!(
            "{} connection {:?} joined the lobby ({}/{})",
            self.ctx.label(),
            connection,
            position,
            self.registry.capacity()
        );

        if self.registry.is_full() {
            Ok(self.start())
        } else {
            Ok(Vec::new())
        }
    }

    /// Seals the roster and sends `StartSession` to every peer.
    ///
    /// Does nothing outside the lobby or while the lobby is empty.
    pub fn start(&mut self) -> Vec<Outbound<C, I>> {
        if self.state != SessionState::Lobby || self.registry.is_empty() {
            return Vec::new();
        }

        let roster = self.registry.seal();
        self.aggregator = Some(InputAggregator::new(&self.ctx, &roster));
        self.state = SessionState::Running;
        info!(
            "{} session started: roster {:?}, {} Hz, forced latency {} ticks",
            self.ctx.label(),
            roster,
            self.ctx.config.tick_rate,
            self.ctx.config.forced_latency_ticks
        );

        self.registry
            .live_peers()
            .map(|slot| Outbound::Send {
                to: slot.connection,
                message: Message::StartSession(StartSession {
                    roster: roster.clone(),
                    tick_rate: self.ctx.config.tick_rate,
                    forced_latency_ticks: self.ctx.config.forced_latency_ticks,
                    this_peer_id: slot.network_id,
                }),
            })
            .collect()
    }

    pub fn handle_message(&mut self, connection: C, message: Message<I>) -> Vec<Outbound<C, I>> {
        let submit = match message {
            Message::ClientTickSubmit(submit) => submit,
            other => {
                warn!(
                    "{} discarding {} from {:?}: not a client message",
                    self.ctx.label(),
                    other.name(),
                    connection
                );
                return Vec::new();
            }
        };

        if self.state == SessionState::Lobby {
            warn!(
                "{} tick {} from {:?} before session start",
                self.ctx.label(),
                submit.tick,
                connection
            );
            return Vec::new();
        }

        let Some(peer) = self.registry.network_id_of(connection) else {
            warn!(
                "{} tick {} from unknown connection {:?}",
                self.ctx.label(),
                submit.tick,
                connection
            );
            return Vec::new();
        };
        let Some(aggregator) = self.aggregator.as_mut() else {
            return Vec::new();
        };

        match aggregator.submit(peer, submit.tick, submit.input, submit.hash) {
            Ok(()) => {}
            Err(SubmissionError::Halted) => {
                debug!(
                    "{} ignoring tick {} from peer {} after desync",
                    self.ctx.label(),
                    submit.tick,
                    peer
                );
                return Vec::new();
            }
            Err(e) => {
                warn!("{} protocol anomaly: {}", self.ctx.label(), e);
                return Vec::new();
            }
        }

        let released = aggregator.release_ready();
        self.broadcast_released(released)
    }

    /// Lobby connections are forgotten; roster members are marked dead and
    /// may unblock pending ticks.
    pub fn handle_disconnect(&mut self, connection: C) -> Vec<Outbound<C, I>> {
        if self.state == SessionState::Lobby {
            if self.registry.remove_pending(connection) {
                info!(
                    "{} connection {:?} left the lobby",
                    self.ctx.label(),
                    connection
                );
            }
            return Vec::new();
        }

        let Some(peer) = self.registry.mark_dead(connection) else {
            return Vec::new();
        };
        let Some(aggregator) = self.aggregator.as_mut() else {
            return Vec::new();
        };

        aggregator.on_peer_disconnected(peer);
        if self.state == SessionState::Halted {
            return Vec::new();
        }

        let released = aggregator.release_ready();
        self.broadcast_released(released)
    }

    fn broadcast_released(
        &mut self,
        released: Vec<ConfirmedTickPayload<I>>,
    ) -> Vec<Outbound<C, I>> {
        let mut outbound = Vec::new();

        for payload in released {
            let desynced = payload.desynced;
            debug!(
                "{} releasing tick {} to {} peers",
                self.ctx.label(),
                payload.tick,
                self.registry.live_roster_size()
            );
            self.broadcast(&mut outbound, Message::ConfirmedTickBroadcast(payload));

            if desynced {
                if let Some(record) = self.desync_record() {
                    error!(
                        "{} halting session: {}",
                        self.ctx.label(),
                        record.to_error()
                    );
                }
                self.broadcast(&mut outbound, Message::DesyncNotice);
                self.state = SessionState::Halted;
                break;
            }
        }

        outbound
    }

    fn broadcast(&self, outbound: &mut Vec<Outbound<C, I>>, message: Message<I>) {
        for slot in self.registry.live_peers() {
            outbound.push(Outbound::Send {
                to: slot.connection,
                message: message.clone(),
            });
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn registry(&self) -> &ConnectionRegistry<C> {
        &self.registry
    }

    pub fn aggregator(&self) -> Option<&InputAggregator<I>> {
        self.aggregator.as_ref()
    }

    pub fn desync_record(&self) -> Option<&DesyncRecord> {
        self.aggregator.as_ref()?.desync_record()
    }

    pub fn network_id_of(&self, connection: C) -> Option<NetworkId> {
        self.registry.network_id_of(connection)
    }

    /// True once the session has started and every roster member is gone.
    pub fn is_finished(&self) -> bool {
        self.state != SessionState::Lobby && self.registry.live_roster_size() == 0
    }
}
