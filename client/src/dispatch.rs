//! FIFO of confirmed ticks waiting for the tick clock

use shared::{ConfirmedTickPayload, Tick};
use std::collections::VecDeque;

/// Released payloads in arrival order. No reordering or validation happens
/// here; the clock decides what to do with each entry.
#[derive(Debug)]
pub struct ClientDispatch<I> {
    queue: VecDeque<ConfirmedTickPayload<I>>,
}

impl<I> ClientDispatch<I> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::with_capacity(64),
        }
    }

    pub fn push(&mut self, payload: ConfirmedTickPayload<I>) {
        self.queue.push_back(payload);
    }

    pub fn peek_next_tick(&self) -> Option<Tick> {
        self.queue.front().map(|payload| payload.tick)
    }

    pub fn pop(&mut self) -> Option<ConfirmedTickPayload<I>> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<I> Default for ClientDispatch<I> {
    fn default() -> Self {
        Self::new()
    }
}
