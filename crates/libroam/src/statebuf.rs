//! Bounded buffer for MVISP state-change notifications.
//!
//! Changes accumulate in insertion order and drain FIFO when the owning
//! client flushes — automatically on a full buffer, explicitly at
//! termination.

use roam_core::wire::STATE_BUFFER_SIZE;
use roam_core::StateChange;

#[derive(Debug, Default)]
pub struct StateBuffer {
    entries: Vec<StateChange>,
}

impl StateBuffer {
    pub fn new() -> StateBuffer {
        StateBuffer {
            entries: Vec::with_capacity(STATE_BUFFER_SIZE),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= STATE_BUFFER_SIZE
    }

    pub fn push(&mut self, change: StateChange) {
        self.entries.push(change);
    }

    /// Remove and return everything, oldest first.
    pub fn drain(&mut self) -> Vec<StateChange> {
        std::mem::take(&mut self.entries)
    }
}
