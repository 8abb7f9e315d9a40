//! Per-connection protocol loop.
//!
//! Each accepted connection runs on its own thread: handshake, spec
//! exchange, then the request loop until TERMINATE or a protocol error.
//! The two variants differ in exactly two places beyond their tag bytes —
//! how the simulation comes to exist, and whether CHANGE_STATE is legal —
//! captured by the `ServerVariant` trait.

use std::io::{Read, Write};
use std::sync::Arc;

use roam_core::config::MobilityConfig;
use roam_core::error::{ProtocolError, Result};
use roam_core::framing::FrameBuf;
use roam_core::handshake::{negotiate, Role};
use roam_core::wire::{
    FeatureSet, SimulationOffer, Variant, MAX_AGENTS, MAX_STATES, MAX_STATE_NAME,
    OP_CHANGE_STATE, OP_LOCATION_REQUEST, OP_TERMINATE,
};
use roam_core::StateChange;

use crate::manager::Manager;
use crate::mobility::{Mobility, Waypoint};

/// Receives MVISP state changes after they pass range validation.
pub trait StateObserver: Send + Sync {
    fn state_changed(&self, change: StateChange);
}

/// Default observer: one structured log line per change.
pub struct LogObserver;

impl StateObserver for LogObserver {
    fn state_changed(&self, change: StateChange) {
        tracing::info!(
            agent = change.agent,
            time_ms = change.time_ms,
            state = change.state,
            "state change"
        );
    }
}

// ── Variant seam ──────────────────────────────────────────────────────────────

/// The points where the UAMP and MVISP servers differ.
pub trait ServerVariant {
    /// Selects the tag bytes and the peer tags the handshake will accept.
    const VARIANT: Variant;

    /// Run the spec exchange and produce the simulation to serve.
    fn exchange_spec<S: Read + Write>(
        &mut self,
        io: &mut FrameBuf<S>,
        mobility: &MobilityConfig,
        features: FeatureSet,
    ) -> Result<Arc<dyn Mobility>>;

    /// Handle a CHANGE_STATE frame of `count` entries.
    fn parse_state_change<S: Read + Write>(
        &mut self,
        io: &mut FrameBuf<S>,
        count: u32,
        num_agents: u32,
        duration_ms: u32,
    ) -> Result<()>;
}

/// UAMP: the client proposes `(num_agents, time_limit, seed)` and the
/// server answers with an accept or reject byte.
pub struct UampServer;

impl ServerVariant for UampServer {
    const VARIANT: Variant = Variant::Uamp;

    fn exchange_spec<S: Read + Write>(
        &mut self,
        io: &mut FrameBuf<S>,
        mobility: &MobilityConfig,
        features: FeatureSet,
    ) -> Result<Arc<dyn Mobility>> {
        io.begin_read(12);
        let num_agents = io.read_u32()?;
        let time_limit_ms = io.read_u32()?;
        let seed = io.read_u32()?;

        if num_agents == 0 || num_agents > MAX_AGENTS {
            io.begin_write(1);
            io.write_u8(0x01)?;
            return Err(ProtocolError::InvalidNumAgents(num_agents));
        }

        io.begin_write(1);
        io.write_u8(0x00)?;
        tracing::info!(num_agents, time_limit_ms, seed, "UAMP simulation accepted");

        Ok(Arc::new(Waypoint::new(
            mobility,
            features.three_d,
            features.appearance,
            num_agents,
            time_limit_ms,
            seed,
        )))
    }

    fn parse_state_change<S: Read + Write>(
        &mut self,
        _io: &mut FrameBuf<S>,
        _count: u32,
        _num_agents: u32,
        _duration_ms: u32,
    ) -> Result<()> {
        Err(ProtocolError::UnknownCommand(OP_CHANGE_STATE))
    }
}

/// MVISP: the server offers its configured simulation; the client answers
/// with a state table, or a 32-bit zero to deny.
pub struct MvispServer {
    pub offer: SimulationOffer,
    pub observer: Arc<dyn StateObserver>,
    states: Vec<String>,
}

impl MvispServer {
    pub fn new(offer: SimulationOffer, observer: Arc<dyn StateObserver>) -> MvispServer {
        MvispServer {
            offer,
            observer,
            states: Vec::new(),
        }
    }

    pub fn states(&self) -> &[String] {
        &self.states
    }
}

impl ServerVariant for MvispServer {
    const VARIANT: Variant = Variant::Mvisp;

    fn exchange_spec<S: Read + Write>(
        &mut self,
        io: &mut FrameBuf<S>,
        mobility: &MobilityConfig,
        features: FeatureSet,
    ) -> Result<Arc<dyn Mobility>> {
        io.begin_write(8);
        io.write_u32(self.offer.num_agents)?;
        io.write_u32(self.offer.time_limit_ms)?;

        io.begin_read(4);
        let num_states = io.read_u32()?;
        if num_states == 0 {
            return Err(ProtocolError::SimulationDenied);
        }
        if num_states > MAX_STATES {
            return Err(ProtocolError::InvalidNumStates(num_states));
        }

        io.begin_read(4 * num_states as u64);
        let mut lengths = Vec::with_capacity(num_states as usize);
        for i in 0..num_states {
            let len = io.read_u32()?;
            if len == 0 {
                return Err(ProtocolError::ZeroStateLength(i));
            }
            if len as usize > MAX_STATE_NAME {
                return Err(ProtocolError::StateLengthLong(i, len));
            }
            lengths.push(len);
        }

        io.begin_read(lengths.iter().map(|&l| l as u64).sum());
        let mut states = Vec::with_capacity(lengths.len());
        for len in lengths {
            let mut bytes = vec![0u8; len as usize];
            io.read_exact(&mut bytes)?;
            let name = String::from_utf8_lossy(&bytes).into_owned();
            if states.contains(&name) {
                return Err(ProtocolError::DuplicateState(name));
            }
            states.push(name);
        }

        tracing::info!(
            num_agents = self.offer.num_agents,
            states = states.len(),
            "MVISP offer accepted"
        );
        self.states = states;

        Ok(Arc::new(Waypoint::new(
            mobility,
            features.three_d,
            features.appearance,
            self.offer.num_agents,
            self.offer.time_limit_ms,
            0,
        )))
    }

    fn parse_state_change<S: Read + Write>(
        &mut self,
        io: &mut FrameBuf<S>,
        count: u32,
        num_agents: u32,
        duration_ms: u32,
    ) -> Result<()> {
        for _ in 0..count {
            let change = StateChange {
                agent: io.read_u32()?,
                time_ms: io.read_u32()?,
                state: io.read_u32()?,
            };
            if change.agent >= num_agents {
                return Err(ProtocolError::InvalidNumAgents(change.agent));
            }
            if change.time_ms > duration_ms {
                return Err(ProtocolError::InvalidChangeTime(change.time_ms as f64 / 1000.0));
            }
            if change.state >= self.states.len() as u32 {
                return Err(ProtocolError::InvalidChangeState(change.state));
            }
            self.observer.state_changed(change);
        }
        Ok(())
    }
}

// ── The loop ──────────────────────────────────────────────────────────────────

/// Serve one connection to completion. Returns `Ok` on a clean TERMINATE.
pub fn run_session<S: Read + Write, V: ServerVariant>(
    stream: S,
    variant: &mut V,
    advertised: FeatureSet,
    worker_threads: usize,
    mobility: &MobilityConfig,
) -> Result<()> {
    let mut io = FrameBuf::new(stream);
    let session = negotiate(&mut io, Role::Server, V::VARIANT, advertised)?;
    let sim = variant.exchange_spec(&mut io, mobility, session.features)?;

    let mut manager = Manager::new(sim.clone(), worker_threads);
    let result = request_loop(&mut io, &mut manager, variant, sim.as_ref(), session.features);
    manager.shutdown();
    result
}

fn request_loop<S: Read + Write, V: ServerVariant>(
    io: &mut FrameBuf<S>,
    manager: &mut Manager,
    variant: &mut V,
    sim: &dyn Mobility,
    features: FeatureSet,
) -> Result<()> {
    loop {
        // Every command is an opcode byte and a 32-bit operand.
        io.begin_read(5);
        let op = io.read_u8()?;
        let operand = io.read_u32()?;

        match op {
            OP_TERMINATE => {
                if operand != 0 {
                    return Err(ProtocolError::UnknownCommand(op));
                }
                tracing::info!("peer terminated cleanly");
                return Ok(());
            }
            OP_LOCATION_REQUEST => {
                tracing::debug!(count = operand, "location request");
                io.begin_read(4 * operand as u64);
                io.begin_write(operand as u64 * features.update_size());
                manager.handle_request(io, operand, features)?;
            }
            OP_CHANGE_STATE => {
                tracing::debug!(count = operand, "state changes");
                io.begin_read(12 * operand as u64);
                variant.parse_state_change(io, operand, sim.num_agents(), sim.duration_ms())?;
            }
            other => return Err(ProtocolError::UnknownCommand(other)),
        }
    }
}
