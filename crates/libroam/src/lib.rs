//! libroam — client library for the Roam agent-mobility protocols.
//!
//! Connect with [`UampClient`] to ask a server to run a simulation, or with
//! [`MvispClient`] to watch one the server already has. Either way the
//! library streams per-agent updates into bounded queues and exposes both
//! the raw per-agent view (`current_command`/`advance`) and the
//! globally-synchronous interpolated view
//! (`intersect_command`/`advance_oldest`).

pub mod client;
pub mod queue;
pub mod statebuf;

pub use client::{time_limit_ms, MvispClient, UampClient};
pub use roam_core::wire::{FeatureSet, SimulationOffer, SimulationSpec};
pub use roam_core::{Command, ProtocolError, Result, StateChange, Update};
