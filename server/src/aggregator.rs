//! Server input aggregation for lockstep ticks
//!
//! Every live peer submits exactly one input (plus a state hash) per tick.
//! Submissions are buffered per tick until the whole live roster has
//! contributed, then the tick is released as one canonical payload.
//!
//! Ticks are released strictly in increasing order: a complete tick T+1 waits
//! until T has gone out. While releasing, every hash is compared to the first
//! one received for that tick; any mismatch flags the payload as desynced and
//! halts the aggregator for good.

use log::{debug, error, info};
use shared::{
    ConfirmedTickPayload, DesyncError, DuplicateSubmissionError, NetworkId, PeerDisconnected,
    SessionContext, Tick, TickInput,
};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    /// Buffering submissions and releasing complete ticks in order
    Collecting,
    /// A desync was released; nothing else ever will be
    Halted,
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Duplicate(#[from] DuplicateSubmissionError),

    #[error("peer {0} is not a live roster member")]
    UnknownPeer(NetworkId),

    #[error("tick {tick} was already released (next is {next})")]
    AlreadyReleased { tick: Tick, next: Tick },

    /// Beyond what an honest client can have sent given the forced latency.
    #[error("tick {tick} is too far ahead (latest accepted is {latest})")]
    TooFarAhead { tick: Tick, latest: Tick },

    #[error("aggregator halted after desync")]
    Halted,
}

#[derive(Debug, Clone)]
struct Contribution<I> {
    input: I,
    hash: u64,
}

/// Per-tick accumulator, created on the first contribution for a tick.
#[derive(Debug, Clone)]
pub struct PendingTickRecord<I> {
    pub tick: Tick,
    contributions: BTreeMap<NetworkId, Contribution<I>>,
    first: Option<NetworkId>,
}

impl<I> PendingTickRecord<I> {
    fn new(tick: Tick) -> Self {
        Self {
            tick,
            contributions: BTreeMap::new(),
            first: None,
        }
    }

    pub fn len(&self) -> usize {
        self.contributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }

    pub fn contains(&self, peer: NetworkId) -> bool {
        self.contributions.contains_key(&peer)
    }

    fn hashes(&self) -> BTreeMap<NetworkId, u64> {
        self.contributions
            .iter()
            .map(|(id, contribution)| (*id, contribution.hash))
            .collect()
    }

    fn remove(&mut self, peer: NetworkId) {
        self.contributions.remove(&peer);
        if self.first == Some(peer) {
            // Fall back to the lowest remaining id; any member works as the
            // reference since all must match
            self.first = self.contributions.keys().next().copied();
        }
    }

    /// True when some hash differs from the first-received one.
    fn has_mismatch(&self) -> bool {
        let Some(first) = self.first.and_then(|id| self.contributions.get(&id)) else {
            return false;
        };
        self.contributions
            .values()
            .any(|contribution| contribution.hash != first.hash)
    }
}

/// Created once, on the first hash mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesyncRecord {
    pub tick: Tick,
    pub hashes: BTreeMap<NetworkId, u64>,
}

impl DesyncRecord {
    pub fn to_error(&self) -> DesyncError {
        DesyncError {
            tick: Some(self.tick),
            hashes: self.hashes.clone(),
        }
    }
}

pub struct InputAggregator<I> {
    label: String,
    live: BTreeSet<NetworkId>,
    pending: BTreeMap<Tick, PendingTickRecord<I>>,
    next_release: Tick,
    forced_latency_ticks: u32,
    state: AggregatorState,
    desync: Option<DesyncRecord>,
}

impl<I: TickInput> InputAggregator<I> {
    pub fn new(ctx: &SessionContext, roster: &[NetworkId]) -> Self {
        Self {
            label: ctx.label().to_string(),
            live: roster.iter().copied().collect(),
            pending: BTreeMap::new(),
            next_release: 1,
            forced_latency_ticks: ctx.config.forced_latency_ticks,
            state: AggregatorState::Collecting,
            desync: None,
        }
    }

    /// Records one peer's input and hash for `tick`.
    ///
    /// The first submission for a (peer, tick) pair stands; a repeat is
    /// rejected with [`SubmissionError::Duplicate`]. A client never runs more
    /// than the forced latency ahead of the last released tick, so anything
    /// past that is rejected before it can open a record.
    pub fn submit(
        &mut self,
        peer: NetworkId,
        tick: Tick,
        input: I,
        hash: u64,
    ) -> Result<(), SubmissionError> {
        if self.state == AggregatorState::Halted {
            return Err(SubmissionError::Halted);
        }
        if !self.live.contains(&peer) {
            return Err(SubmissionError::UnknownPeer(peer));
        }
        if tick < self.next_release {
            return Err(SubmissionError::AlreadyReleased {
                tick,
                next: self.next_release,
            });
        }
        let latest = self.latest_accepted_tick();
        if tick > latest {
            return Err(SubmissionError::TooFarAhead { tick, latest });
        }

        let record = self
            .pending
            .entry(tick)
            .or_insert_with(|| PendingTickRecord::new(tick));
        if record.contains(peer) {
            return Err(DuplicateSubmissionError {
                network_id: peer,
                tick,
            }
            .into());
        }

        record.contributions.insert(peer, Contribution { input, hash });
        if record.first.is_none() {
            record.first = Some(peer);
        }
        debug!(
            "{} tick {}: {}/{} inputs (peer {})",
            self.label,
            tick,
            record.len(),
            self.live.len(),
            peer
        );
        Ok(())
    }

    /// Releases `tick` if it is next in order and every live peer has
    /// contributed.
    pub fn try_release(&mut self, tick: Tick) -> Option<ConfirmedTickPayload<I>> {
        if self.state == AggregatorState::Halted || tick != self.next_release {
            return None;
        }

        let record = self.pending.get(&tick)?;
        if record.is_empty() || record.len() != self.live.len() {
            return None;
        }
        debug_assert!(record.contributions.keys().all(|id| self.live.contains(id)));

        let record = self.pending.remove(&tick)?;
        let desynced = record.has_mismatch();
        self.next_release += 1;

        if desynced {
            let desync = DesyncRecord {
                tick,
                hashes: record.hashes(),
            };
            error!(
                "{} desync at tick {}: hashes {:x?}",
                self.label, tick, desync.hashes
            );
            self.desync = Some(desync);
            self.state = AggregatorState::Halted;
            self.pending.clear();
        }

        let (network_ids, inputs): (Vec<NetworkId>, Vec<I>) = record
            .contributions
            .into_iter()
            .map(|(id, contribution)| (id, contribution.input))
            .unzip();

        Some(ConfirmedTickPayload {
            tick,
            network_ids,
            inputs,
            desynced,
        })
    }

    /// Releases every consecutive complete tick, in order.
    pub fn release_ready(&mut self) -> Vec<ConfirmedTickPayload<I>> {
        let mut released = Vec::new();
        while let Some(payload) = self.try_release(self.next_release) {
            let desynced = payload.desynced;
            released.push(payload);
            if desynced {
                break;
            }
        }
        released
    }

    /// Removes a peer from the live roster and purges its pending inputs.
    ///
    /// Ticks that were waiting only on this peer become releasable; call
    /// [`release_ready`](Self::release_ready) afterwards.
    pub fn on_peer_disconnected(&mut self, peer: NetworkId) -> Option<PeerDisconnected> {
        if !self.live.remove(&peer) {
            return None;
        }

        for record in self.pending.values_mut() {
            record.remove(peer);
        }
        self.pending.retain(|_, record| !record.is_empty());

        info!(
            "{} peer {} left, live roster is now {}",
            self.label,
            peer,
            self.live.len()
        );
        Some(PeerDisconnected { network_id: peer })
    }

    pub fn live_roster_size(&self) -> usize {
        self.live.len()
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state == AggregatorState::Halted
    }

    pub fn desync_record(&self) -> Option<&DesyncRecord> {
        self.desync.as_ref()
    }

    pub fn next_release_tick(&self) -> Tick {
        self.next_release
    }

    /// Highest tick a peer may submit right now.
    pub fn latest_accepted_tick(&self) -> Tick {
        (self.next_release - 1).saturating_add(self.forced_latency_ticks)
    }

    pub fn pending_record(&self, tick: Tick) -> Option<&PendingTickRecord<I>> {
        self.pending.get(&tick)
    }

    pub fn pending_tick_count(&self) -> usize {
        self.pending.len()
    }
}
