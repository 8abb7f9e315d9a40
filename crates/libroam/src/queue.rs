//! Per-agent update queue.
//!
//! Each agent's stream arrives in bursts ahead of consumption. The queue
//! holds the `previous` and `current` updates the application is looking at,
//! plus a bounded ring of received-but-unconsumed lookahead. Every received
//! update is validated against the stream invariants before it is admitted;
//! a violation condemns the whole connection.

use std::collections::VecDeque;

use roam_core::error::{ProtocolError, Result};
use roam_core::wire::QUEUE_SIZE;
use roam_core::Update;

/// The client-side queue for one agent.
#[derive(Debug)]
pub struct AgentQueue {
    agent: u32,
    previous: Update,
    current: Update,
    /// Received updates not yet promoted to `current`, oldest first.
    pending: VecDeque<Update>,
    /// The most recently received update, for terminal-duplicate comparison.
    last_received: Update,
    /// The initial update has arrived.
    primed: bool,
    /// An update at exactly the simulation duration has arrived.
    received_final: bool,
}

const ZERO: Update = Update {
    time_ms: 0,
    x_mm: 0,
    y_mm: 0,
    z_mm: 0,
    present: true,
};

impl AgentQueue {
    pub fn new(agent: u32) -> AgentQueue {
        AgentQueue {
            agent,
            previous: ZERO,
            current: ZERO,
            pending: VecDeque::with_capacity(QUEUE_SIZE),
            last_received: ZERO,
            primed: false,
            received_final: false,
        }
    }

    pub fn agent(&self) -> u32 {
        self.agent
    }

    pub fn previous(&self) -> &Update {
        &self.previous
    }

    pub fn current(&self) -> &Update {
        &self.current
    }

    pub fn received_final(&self) -> bool {
        self.received_final
    }

    /// Live entries: the current update plus buffered lookahead.
    pub fn alive_in_queue(&self) -> usize {
        if self.primed {
            1 + self.pending.len()
        } else {
            0
        }
    }

    /// No lookahead left and the stream has more to give.
    pub fn needs_refill(&self) -> bool {
        self.pending.is_empty() && !self.received_final
    }

    /// The stream is fully consumed: the current update is the terminal one.
    pub fn at_end(&self) -> bool {
        self.received_final && self.pending.is_empty()
    }

    /// How many updates to request for this agent.
    ///
    /// The first fill asks for `QUEUE_SIZE + 1`: one extra beyond the ring,
    /// kept for wire compatibility with servers tuned to the original
    /// client's larger circular structure. Afterwards the demand tops the
    /// live count back up to `QUEUE_SIZE`, and goes to zero once the
    /// terminal update has arrived.
    pub fn demand(&self) -> u64 {
        if !self.primed {
            (QUEUE_SIZE + 1) as u64
        } else if self.received_final {
            0
        } else {
            QUEUE_SIZE.saturating_sub(self.alive_in_queue()) as u64
        }
    }

    /// Admit one received update, enforcing the stream invariants.
    pub fn receive(&mut self, update: Update, duration_ms: u32) -> Result<()> {
        if !self.primed {
            if update.time_ms != 0 {
                return Err(ProtocolError::FirstUpdateTime(self.agent, update.time_ms));
            }
            self.previous = update;
            self.current = update;
            self.last_received = update;
            self.primed = true;
            if duration_ms == 0 {
                self.received_final = true;
            }
            return Ok(());
        }

        if self.received_final {
            // Terminal repeats are checked byte-for-byte and dropped; they
            // carry nothing the queue needs to hold.
            if update != self.last_received {
                return Err(ProtocolError::NonEqualFinalUpdates(self.agent));
            }
            return Ok(());
        }

        if update.time_ms <= self.last_received.time_ms {
            return Err(ProtocolError::TimestampNotIncremented(
                self.agent,
                update.time_ms,
                self.last_received.time_ms,
            ));
        }
        if update.time_ms > duration_ms {
            return Err(ProtocolError::TimestampTooLarge(self.agent, update.time_ms));
        }

        if update.time_ms == duration_ms {
            self.received_final = true;
        }
        self.pending.push_back(update);
        self.last_received = update;
        Ok(())
    }

    /// Promote the oldest lookahead update to `current`.
    pub fn advance(&mut self) -> Result<()> {
        match self.pending.pop_front() {
            Some(next) => {
                self.previous = self.current;
                self.current = next;
                Ok(())
            }
            None => Err(ProtocolError::NoMoreData(self.agent)),
        }
    }
}
