//! Client connections for both protocol variants.
//!
//! A connection owns one framed TCP stream and one `AgentQueue` per agent.
//! `UampClient` proposes a simulation for the server to run; `MvispClient`
//! receives the server's offer, answers with a state table (or a denial),
//! and may send state changes back. Everything after the spec exchange is
//! shared: the request engine, the per-agent queues, and the
//! globally-synchronous interpolated view.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use roam_core::error::{ProtocolError, Result};
use roam_core::framing::FrameBuf;
use roam_core::handshake::{negotiate, Role};
use roam_core::update::millis;
use roam_core::wire::{
    FeatureSet, SimulationOffer, SimulationSpec, Variant, MAX_AGENTS, MAX_STATES,
    MAX_STATE_NAME, OP_CHANGE_STATE, OP_LOCATION_REQUEST, OP_TERMINATE,
};
use roam_core::{Command, StateChange, Update};

use crate::queue::AgentQueue;
use crate::statebuf::StateBuffer;

/// Convert an application time limit in seconds to wire milliseconds.
pub fn time_limit_ms(seconds: f64) -> Result<u32> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ProtocolError::InvalidTimeLimit(seconds));
    }
    let ms = millis(seconds);
    if ms > u32::MAX as u64 {
        return Err(ProtocolError::InvalidTimeLimit(seconds));
    }
    Ok(ms as u32)
}

// ── Shared connection state ───────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct ClientCore<S> {
    io: FrameBuf<S>,
    features: FeatureSet,
    duration_ms: u32,
    queues: Vec<AgentQueue>,
    /// Maximum over all agents of their previous update's time.
    largest_last_ms: u32,
    /// Minimum over all agents of their current update's time.
    smallest_current_ms: u32,
}

impl<S: Read + Write> ClientCore<S> {
    pub(crate) fn new(
        io: FrameBuf<S>,
        features: FeatureSet,
        duration_ms: u32,
        num_agents: u32,
    ) -> ClientCore<S> {
        ClientCore {
            io,
            features,
            duration_ms,
            queues: (0..num_agents).map(AgentQueue::new).collect(),
            largest_last_ms: 0,
            smallest_current_ms: 0,
        }
    }

    fn num_agents(&self) -> u32 {
        self.queues.len() as u32
    }

    fn duration_s(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }

    /// Request and receive updates for every agent with outstanding demand.
    ///
    /// Demand is partitioned into LOCATION_REQUESTs of at most `u32::MAX`
    /// IDs, walking the agent array in order and splitting one agent's
    /// demand across adjacent requests when a boundary falls inside it.
    pub(crate) fn fill(&mut self) -> Result<()> {
        let demands: Vec<u64> = self.queues.iter().map(|q| q.demand()).collect();
        if demands.iter().all(|&d| d == 0) {
            return Ok(());
        }
        let update_size = self.features.update_size();

        for chunk in plan_requests(&demands, u32::MAX as u64) {
            let count: u64 = chunk.iter().map(|&(_, n)| n).sum();
            tracing::debug!(count, "requesting updates");

            self.io.begin_write(5 + 4 * count);
            self.io.write_u8(OP_LOCATION_REQUEST)?;
            self.io.write_u32(count as u32)?;
            for &(agent, n) in &chunk {
                for _ in 0..n {
                    self.io.write_u32(agent)?;
                }
            }

            self.io.begin_read(count * update_size);
            for &(agent, n) in &chunk {
                for _ in 0..n {
                    let update = Update::read_from(&mut self.io, self.features)?;
                    self.queues[agent as usize].receive(update, self.duration_ms)?;
                }
            }
        }
        Ok(())
    }

    fn current_command(&self, agent: u32) -> Command {
        let q = &self.queues[agent as usize];
        Command::between(agent, q.previous(), q.current())
    }

    fn advance(&mut self, agent: u32) -> Result<()> {
        let idx = agent as usize;
        if self.queues[idx].at_end() {
            return Err(ProtocolError::NoMoreData(agent));
        }
        if self.queues[idx].needs_refill() {
            self.fill()?;
        }

        let old_current_ms = self.queues[idx].current().time_ms;
        self.queues[idx].advance()?;

        // The old current update became this agent's previous.
        self.largest_last_ms = self.largest_last_ms.max(old_current_ms);

        // The minimum can only move if the advanced agent was sitting on it,
        // and then only a rescan can find the new one.
        if old_current_ms == self.smallest_current_ms {
            self.smallest_current_ms = self
                .queues
                .iter()
                .map(|q| q.current().time_ms)
                .min()
                .unwrap_or(0);
        }
        Ok(())
    }

    fn advance_oldest(&mut self) -> Result<()> {
        let target = self.smallest_current_ms;
        for agent in 0..self.num_agents() {
            if self.queues[agent as usize].current().time_ms == target {
                self.advance(agent)?;
            }
        }
        Ok(())
    }

    fn intersect_command(&self, agent: u32) -> Result<Command> {
        let from_ms = self.largest_last_ms;
        let to_ms = self.smallest_current_ms;
        if from_ms > to_ms {
            return Err(ProtocolError::NoIntersection);
        }

        let q = &self.queues[agent as usize];
        let current = q.current();
        if current.time_ms == 0 {
            // The agent has not moved off its initial point yet.
            return Ok(Command::between(agent, current, current));
        }

        let previous = q.previous();
        let span = (current.time_ms - previous.time_ms) as f64;
        let lerp = |ms: u32, from: f64, to: f64| -> f64 {
            let fraction = (ms - previous.time_ms) as f64 / span;
            from + fraction * (to - from)
        };

        Ok(Command {
            agent,
            from_x: lerp(from_ms, previous.x_m(), current.x_m()),
            from_y: lerp(from_ms, previous.y_m(), current.y_m()),
            from_z: lerp(from_ms, previous.z_m(), current.z_m()),
            from_time: from_ms as f64 / 1000.0,
            to_x: lerp(to_ms, previous.x_m(), current.x_m()),
            to_y: lerp(to_ms, previous.y_m(), current.y_m()),
            to_z: lerp(to_ms, previous.z_m(), current.z_m()),
            to_time: to_ms as f64 / 1000.0,
            present: previous.present,
        })
    }

    fn send_terminate(&mut self) -> Result<()> {
        self.io.begin_write(5);
        self.io.write_u8(OP_TERMINATE)?;
        self.io.write_u32(0)?;
        Ok(())
    }

    fn send_state_changes(&mut self, changes: &[StateChange]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = changes.len(), "flushing state changes");
        self.io.begin_write(5 + 12 * changes.len() as u64);
        self.io.write_u8(OP_CHANGE_STATE)?;
        self.io.write_u32(changes.len() as u32)?;
        for change in changes {
            self.io.write_u32(change.agent)?;
            self.io.write_u32(change.time_ms)?;
            self.io.write_u32(change.state)?;
        }
        Ok(())
    }
}

/// Split per-agent demand into request chunks of at most `max_ids` IDs each.
fn plan_requests(demands: &[u64], max_ids: u64) -> Vec<Vec<(u32, u64)>> {
    let mut chunks = Vec::new();
    let mut chunk: Vec<(u32, u64)> = Vec::new();
    let mut in_chunk = 0u64;

    for (agent, &demand) in demands.iter().enumerate() {
        let mut left = demand;
        while left > 0 {
            let take = left.min(max_ids - in_chunk);
            chunk.push((agent as u32, take));
            in_chunk += take;
            left -= take;
            if in_chunk == max_ids {
                chunks.push(std::mem::take(&mut chunk));
                in_chunk = 0;
            }
        }
    }
    if !chunk.is_empty() {
        chunks.push(chunk);
    }
    chunks
}

fn open_stream(addr: &str) -> Result<TcpStream> {
    let addrs: Vec<_> = addr
        .to_socket_addrs()
        .map_err(|_| ProtocolError::HostnameResolution(addr.to_string()))?
        .collect();
    if addrs.is_empty() {
        return Err(ProtocolError::HostnameResolution(addr.to_string()));
    }
    TcpStream::connect(&addrs[..]).map_err(|e| ProtocolError::SocketConnect(addr.to_string(), e))
}

// ── UAMP ──────────────────────────────────────────────────────────────────────

/// A UAMP connection: this client asked the server to run `spec`.
#[derive(Debug)]
pub struct UampClient {
    core: ClientCore<TcpStream>,
}

impl UampClient {
    /// Connect, negotiate, propose `spec`, and prime every agent queue.
    pub fn connect(addr: &str, spec: SimulationSpec, features: FeatureSet) -> Result<UampClient> {
        if spec.num_agents == 0 || spec.num_agents > MAX_AGENTS {
            return Err(ProtocolError::InvalidNumAgents(spec.num_agents));
        }

        let stream = open_stream(addr)?;
        let mut io = FrameBuf::new(stream);
        let session = negotiate(&mut io, Role::Client, Variant::Uamp, features)?;

        io.begin_write(12);
        io.write_u32(spec.num_agents)?;
        io.write_u32(spec.time_limit_ms)?;
        io.write_u32(spec.seed)?;

        io.begin_read(1);
        match io.read_u8()? {
            0x00 => {}
            0x01 => return Err(ProtocolError::SimulationDenied),
            other => return Err(ProtocolError::SimulationResponseBad(other)),
        }

        tracing::info!(
            agents = spec.num_agents,
            duration_ms = spec.time_limit_ms,
            seed = spec.seed,
            "UAMP simulation accepted"
        );

        let mut core = ClientCore::new(io, session.features, spec.time_limit_ms, spec.num_agents);
        core.fill()?;
        Ok(UampClient { core })
    }

    pub fn num_agents(&self) -> u32 {
        self.core.num_agents()
    }

    pub fn duration(&self) -> f64 {
        self.core.duration_s()
    }

    pub fn features(&self) -> FeatureSet {
        self.core.features
    }

    /// The command spanning the agent's previous and current updates.
    pub fn current_command(&self, agent: u32) -> Command {
        self.core.current_command(agent)
    }

    /// Move the agent one update forward, refilling from the server if its
    /// lookahead ran out.
    pub fn advance(&mut self, agent: u32) -> Result<()> {
        self.core.advance(agent)
    }

    /// The agent's command interpolated onto the global intersection window.
    pub fn intersect_command(&self, agent: u32) -> Result<Command> {
        self.core.intersect_command(agent)
    }

    /// Advance every agent sitting on the global minimum time.
    pub fn advance_oldest(&mut self) -> Result<()> {
        self.core.advance_oldest()
    }

    /// Send TERMINATE and close the connection.
    pub fn terminate(mut self) -> Result<()> {
        self.core.send_terminate()
    }
}

// ── MVISP ─────────────────────────────────────────────────────────────────────

/// An MVISP connection: the server publishes a simulation, this client
/// watches it and reports agent state changes.
#[derive(Debug)]
pub struct MvispClient {
    core: ClientCore<TcpStream>,
    states: Vec<String>,
    changes: StateBuffer,
}

impl MvispClient {
    /// Connect, negotiate, and answer the server's simulation offer.
    ///
    /// `accept` inspects the offer and either returns the state table
    /// (accepting) or `None` (denying). On denial the client sends the
    /// 32-bit-zero rejection, disconnects, and `Ok(None)` is returned.
    pub fn connect<F>(addr: &str, features: FeatureSet, accept: F) -> Result<Option<MvispClient>>
    where
        F: FnOnce(&SimulationOffer) -> Option<Vec<String>>,
    {
        let stream = open_stream(addr)?;
        let mut io = FrameBuf::new(stream);
        let session = negotiate(&mut io, Role::Client, Variant::Mvisp, features)?;

        io.begin_read(8);
        let offer = SimulationOffer {
            num_agents: io.read_u32()?,
            time_limit_ms: io.read_u32()?,
        };

        if offer.num_agents == 0 {
            send_denial(&mut io);
            return Err(ProtocolError::MvispNoAgents);
        }
        if offer.num_agents > MAX_AGENTS {
            send_denial(&mut io);
            return Err(ProtocolError::InvalidNumAgents(offer.num_agents));
        }

        let states = match accept(&offer) {
            Some(states) => states,
            None => {
                tracing::info!(agents = offer.num_agents, "MVISP offer denied");
                send_denial(&mut io);
                return Ok(None);
            }
        };
        validate_states(&states)?;

        let names_len: u64 = states.iter().map(|s| s.len() as u64).sum();
        io.begin_write(4 + 4 * states.len() as u64 + names_len);
        io.write_u32(states.len() as u32)?;
        for state in &states {
            io.write_u32(state.len() as u32)?;
        }
        for state in &states {
            io.write_all(state.as_bytes())?;
        }

        tracing::info!(
            agents = offer.num_agents,
            duration_ms = offer.time_limit_ms,
            states = states.len(),
            "MVISP offer accepted"
        );

        let mut core =
            ClientCore::new(io, session.features, offer.time_limit_ms, offer.num_agents);
        core.fill()?;
        Ok(Some(MvispClient {
            core,
            states,
            changes: StateBuffer::new(),
        }))
    }

    pub fn num_agents(&self) -> u32 {
        self.core.num_agents()
    }

    pub fn duration(&self) -> f64 {
        self.core.duration_s()
    }

    pub fn features(&self) -> FeatureSet {
        self.core.features
    }

    pub fn num_states(&self) -> u32 {
        self.states.len() as u32
    }

    pub fn state_name(&self, state: u32) -> &str {
        &self.states[state as usize]
    }

    pub fn current_command(&self, agent: u32) -> Command {
        self.core.current_command(agent)
    }

    pub fn advance(&mut self, agent: u32) -> Result<()> {
        self.core.advance(agent)
    }

    pub fn intersect_command(&self, agent: u32) -> Result<Command> {
        self.core.intersect_command(agent)
    }

    pub fn advance_oldest(&mut self) -> Result<()> {
        self.core.advance_oldest()
    }

    /// Record that `agent` entered `state` at `time_s` seconds. Buffered;
    /// a full buffer flushes to the server automatically.
    pub fn change_state(&mut self, agent: u32, time_s: f64, state: u32) -> Result<()> {
        assert!(
            (agent as usize) < self.core.queues.len(),
            "agent id out of range"
        );

        let ms = millis(time_s);
        if !time_s.is_finite() || time_s < 0.0 || ms > self.core.duration_ms as u64 {
            return Err(ProtocolError::InvalidChangeTime(time_s));
        }
        if state >= self.states.len() as u32 {
            return Err(ProtocolError::InvalidChangeState(state));
        }

        self.changes.push(StateChange {
            agent,
            time_ms: ms as u32,
            state,
        });
        if self.changes.is_full() {
            self.flush_state_changes()?;
        }
        Ok(())
    }

    /// Send all buffered state changes now. An empty buffer sends nothing.
    pub fn flush_state_changes(&mut self) -> Result<()> {
        let drained = self.changes.drain();
        self.core.send_state_changes(&drained)
    }

    /// Flush any buffered state changes, send TERMINATE, and close.
    pub fn terminate(mut self) -> Result<()> {
        self.flush_state_changes()?;
        self.core.send_terminate()
    }
}

fn send_denial<S: Read + Write>(io: &mut FrameBuf<S>) {
    io.begin_write(4);
    if let Err(e) = io.write_u32(0) {
        tracing::debug!(error = %e, "denial not delivered");
    }
}

fn validate_states(states: &[String]) -> Result<()> {
    if states.is_empty() || states.len() as u32 > MAX_STATES {
        return Err(ProtocolError::InvalidNumStates(states.len() as u32));
    }
    for (i, state) in states.iter().enumerate() {
        if state.is_empty() {
            return Err(ProtocolError::ZeroStateLength(i as u32));
        }
        if state.len() > MAX_STATE_NAME {
            return Err(ProtocolError::StateLengthLong(i as u32, state.len() as u32));
        }
        if states[..i].contains(state) {
            return Err(ProtocolError::DuplicateState(state.clone()));
        }
    }
    Ok(())
}
