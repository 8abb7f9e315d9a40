//! The closed set of protocol errors shared by both peers.
//!
//! Every network or protocol-conformance failure is fatal to the connection;
//! the peer that detects it closes after sending, when the phase allows, a
//! one-byte or 32-bit-zero rejection signal. Programmer errors (framing
//! overruns, out-of-range agent IDs) are not represented here — they panic.

use std::io;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    // ── Connection setup ──────────────────────────────────────────────────
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("cannot resolve hostname {0}")]
    HostnameResolution(String),
    #[error("cannot create socket: {0}")]
    SocketCreate(io::Error),
    #[error("cannot connect to {0}: {1}")]
    SocketConnect(String, io::Error),

    // ── Transport ─────────────────────────────────────────────────────────
    #[error("connection closed mid-frame")]
    SocketDry,
    #[error("socket read failed: {0}")]
    SocketRead(io::Error),
    #[error("socket write failed: {0}")]
    SocketWrite(io::Error),

    // ── Handshake ─────────────────────────────────────────────────────────
    #[error("UAMP client connected to an MVISP server")]
    UampClientMvispServer,
    #[error("MVISP client connected to a UAMP server")]
    MvispClientUampServer,
    #[error("peer sent an unknown handshake tag")]
    ServerUnknownHandshake,
    #[error("no protocol version shared with peer")]
    NoSharedVersion,
    #[error("server requires 3D coordinates this client did not offer")]
    ThreeDClientMismatch,
    #[error("server requires appear/disappear support this client did not offer")]
    AddRemoveUnsupported,
    #[error("undefined feature bits advertised: {0:#010x}")]
    InvalidFeatures(u32),
    #[error("server rejected the handshake")]
    ServerRejectedHandshake,
    #[error("server and client chose different protocol versions")]
    ServerClientVersionDisagree,

    // ── Spec exchange ─────────────────────────────────────────────────────
    #[error("invalid number of agents: {0}")]
    InvalidNumAgents(u32),
    #[error("invalid time limit: {0} s")]
    InvalidTimeLimit(f64),
    #[error("invalid number of states: {0}")]
    InvalidNumStates(u32),
    #[error("state {0} has zero length")]
    ZeroStateLength(u32),
    #[error("state {0} name exceeds the permitted length: {1} bytes")]
    StateLengthLong(u32, u32),
    #[error("duplicate state name: {0:?}")]
    DuplicateState(String),
    #[error("peer denied the simulation")]
    SimulationDenied,
    #[error("malformed simulation response byte: {0:#04x}")]
    SimulationResponseBad(u8),
    #[error("MVISP server offered a simulation with no agents")]
    MvispNoAgents,

    // ── Request loop ──────────────────────────────────────────────────────
    #[error("undefined command byte: {0:#04x}")]
    UnknownCommand(u8),

    // ── Client view ───────────────────────────────────────────────────────
    #[error("agent {0} has no updates beyond the end of the simulation")]
    NoMoreData(u32),
    #[error("no interpolation window: an agent lags behind another's history")]
    NoIntersection,
    #[error("state-change time {0} s is outside the simulation")]
    InvalidChangeTime(f64),
    #[error("state-change state {0} is not in the negotiated table")]
    InvalidChangeState(u32),

    // ── Update stream validation ──────────────────────────────────────────
    #[error("agent {0}: first update arrived with non-zero time {1} ms")]
    FirstUpdateTime(u32, u32),
    #[error("agent {0}: updates after the terminal differ from it")]
    NonEqualFinalUpdates(u32),
    #[error("agent {0}: update time {1} ms exceeds the simulation duration")]
    TimestampTooLarge(u32, u32),
    #[error("agent {0}: update time {1} ms does not advance past {2} ms")]
    TimestampNotIncremented(u32, u32, u32),
    #[error("present flag is not 0 or 1: {0:#04x}")]
    InvalidPresentFlag(u8),
}
