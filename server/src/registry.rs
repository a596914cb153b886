//! Connection registry for the session roster
//!
//! This module tracks every peer connection the server has admitted:
//! - Admission while the lobby is open, bounded by the configured capacity
//! - Contiguous network id assignment when the roster is sealed at start
//! - Liveness of roster members once the session runs
//!
//! Slots are never reused. A roster member that disconnects keeps its slot,
//! marked dead, so ids stay stable for the whole session.

use log::info;
use shared::{NetworkId, RosterOverflowError};
use std::fmt::Debug;

/// One admitted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSlot<C> {
    /// Position in accept order while in the lobby; the final id once sealed
    pub network_id: NetworkId,
    /// Handle used by the transport to reach this peer
    pub connection: C,
    /// False once the peer has disconnected
    pub live: bool,
}

/// Fixed-capacity table of peer slots.
pub struct ConnectionRegistry<C> {
    slots: Vec<PeerSlot<C>>,
    capacity: usize,
    sealed: bool,
}

impl<C: Copy + Eq + Debug> ConnectionRegistry<C> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            sealed: false,
        }
    }

    /// Admits a connection into the lobby.
    ///
    /// Fails once the roster is sealed or the lobby is at capacity.
    pub fn admit(&mut self, connection: C) -> Result<NetworkId, RosterOverflowError> {
        if self.sealed || self.slots.len() >= self.capacity {
            return Err(RosterOverflowError {
                connected: self.slots.len(),
                capacity: self.capacity,
                started: self.sealed,
            });
        }

        let provisional = self.slots.len() as NetworkId + 1;
        self.slots.push(PeerSlot {
            network_id: provisional,
            connection,
            live: true,
        });
        Ok(provisional)
    }

    /// Drops a lobby connection entirely. Only valid before sealing.
    pub fn remove_pending(&mut self, connection: C) -> bool {
        if self.sealed {
            return false;
        }

        let before = self.slots.len();
        self.slots.retain(|slot| slot.connection != connection);
        self.renumber();
        before != self.slots.len()
    }

    /// Fixes the roster and assigns ids `1..=n` in accept order.
    pub fn seal(&mut self) -> Vec<NetworkId> {
        self.renumber();
        self.sealed = true;
        info!(
            "Roster sealed with {} of {} peers",
            self.slots.len(),
            self.capacity
        );
        self.roster_ids()
    }

    /// Marks a roster member dead. Returns its id if it was live.
    pub fn mark_dead(&mut self, connection: C) -> Option<NetworkId> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.connection == connection && slot.live)?;
        slot.live = false;
        Some(slot.network_id)
    }

    /// Network id of a live connection.
    pub fn network_id_of(&self, connection: C) -> Option<NetworkId> {
        self.slots
            .iter()
            .find(|slot| slot.connection == connection && slot.live)
            .map(|slot| slot.network_id)
    }

    pub fn contains(&self, connection: C) -> bool {
        self.slots.iter().any(|slot| slot.connection == connection)
    }

    pub fn live_peers(&self) -> impl Iterator<Item = &PeerSlot<C>> {
        self.slots.iter().filter(|slot| slot.live)
    }

    pub fn live_roster_size(&self) -> usize {
        self.live_peers().count()
    }

    /// Every roster id, dead members included.
    pub fn roster_ids(&self) -> Vec<NetworkId> {
        self.slots.iter().map(|slot| slot.network_id).collect()
    }

    pub fn slots(&self) -> &[PeerSlot<C>] {
        &self.slots
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn renumber(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            slot.network_id = index as NetworkId + 1;
        }
    }
}
