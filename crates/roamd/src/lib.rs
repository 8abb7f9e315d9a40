//! roamd — the Roam mobility server.
//!
//! Serves either protocol variant over TCP: UAMP clients bring a simulation
//! spec for the built-in waypoint model to run; MVISP clients are offered
//! the configured simulation and may report agent state changes back.

pub mod listener;
pub mod manager;
pub mod mobility;
pub mod session;

pub use listener::{bind_with_retry, Server};
pub use mobility::{Mobility, Waypoint};
pub use session::{LogObserver, MvispServer, StateObserver, UampServer};
