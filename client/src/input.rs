//! Client input sampling and outgoing tick submissions

use crate::error::ClientError;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::sim::PlayerInput;
use shared::{ClientTickSubmit, InputSource, Message, NetworkId, Tick, TickInput};
use std::marker::PhantomData;

/// Samples one input per tick and queues the encoded submission.
///
/// Ticks passed to [`emit`](Self::emit) must strictly increase; each tick is
/// sampled exactly once.
pub struct InputChannel<I, S> {
    label: String,
    network_id: NetworkId,
    source: S,
    last_sent: Tick,
    outbox: Vec<Vec<u8>>,
    _input: PhantomData<I>,
}

impl<I: TickInput, S: InputSource<I>> InputChannel<I, S> {
    pub fn new(label: impl Into<String>, network_id: NetworkId, source: S) -> Self {
        Self {
            label: label.into(),
            network_id,
            source,
            last_sent: 0,
            outbox: Vec::new(),
            _input: PhantomData,
        }
    }

    /// Samples the input for `tick`, attaches `hash` and queues the frame.
    pub fn emit(&mut self, tick: Tick, hash: u64) -> Result<(), ClientError> {
        if tick <= self.last_sent {
            return Err(ClientError::TickNotIncreasing {
                tick,
                last_sent: self.last_sent,
            });
        }

        let input = self.source.sample(tick);
        let frame = Message::ClientTickSubmit(ClientTickSubmit { input, tick, hash }).encode()?;
        debug!(
            "{} sending tick {} (hash {:016x})",
            self.label, tick, hash
        );

        self.outbox.push(frame);
        self.last_sent = tick;
        Ok(())
    }

    /// Takes every frame queued since the last drain.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbox)
    }

    pub fn last_sent(&self) -> Tick {
        self.last_sent
    }

    pub fn network_id(&self) -> NetworkId {
        self.network_id
    }

    pub fn pending_frames(&self) -> usize {
        self.outbox.len()
    }
}

/// Deterministic stand-in for a human player.
///
/// Holds a random movement for a random number of ticks, then picks a new
/// one. The same seed always produces the same sequence.
pub struct ScriptedInput {
    rng: StdRng,
    current: PlayerInput,
    ticks_left: u32,
}

impl ScriptedInput {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            current: PlayerInput::default(),
            ticks_left: 0,
        }
    }
}

impl InputSource<PlayerInput> for ScriptedInput {
    fn sample(&mut self, _tick: Tick) -> PlayerInput {
        if self.ticks_left == 0 {
            let direction = self.rng.gen_range(0..3u8);
            self.current = PlayerInput {
                left: direction == 1,
                right: direction == 2,
                jump: self.rng.gen_bool(0.2),
            };
            self.ticks_left = self.rng.gen_range(5..30);
        }

        self.ticks_left -= 1;
        self.current
    }
}
