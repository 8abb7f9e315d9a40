//! Roam integration harness.
//!
//! Every test runs a real server session and a real client in-process,
//! over localhost TCP on an ephemeral port. Each spawned server handles
//! exactly one connection and returns its session result for the test to
//! inspect.

mod handshake;
mod mvisp;
mod ordering;
mod uamp;

use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use roam_core::config::MobilityConfig;
use roam_core::error::{ProtocolError, Result};
use roam_core::wire::{FeatureSet, SimulationOffer};
use roam_core::StateChange;
use roamd::session::{run_session, MvispServer, StateObserver, UampServer};

// ── Server scaffolding ────────────────────────────────────────────────────────

/// A fast-moving simulation so tests finish in a handful of updates.
pub fn test_mobility() -> MobilityConfig {
    MobilityConfig {
        map_width_m: 100.0,
        map_height_m: 100.0,
        step_ms: 500,
        pause_min_s: 0.0,
        pause_max_s: 1.0,
        ..MobilityConfig::default()
    }
}

/// Bind an ephemeral port and serve exactly one connection with `serve`.
pub fn spawn_server<F>(serve: F) -> (String, JoinHandle<Result<()>>)
where
    F: FnOnce(TcpStream) -> Result<()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr").to_string();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().map_err(ProtocolError::SocketCreate)?;
        serve(stream)
    });
    (addr, handle)
}

pub fn spawn_uamp_server(
    features: FeatureSet,
    workers: usize,
) -> (String, JoinHandle<Result<()>>) {
    spawn_server(move |stream| {
        run_session(stream, &mut UampServer, features, workers, &test_mobility())
    })
}

pub fn spawn_mvisp_server(
    offer: SimulationOffer,
    observer: Arc<dyn StateObserver>,
    features: FeatureSet,
) -> (String, JoinHandle<Result<()>>) {
    spawn_server(move |stream| {
        let mut variant = MvispServer::new(offer, observer);
        run_session(stream, &mut variant, features, 2, &test_mobility())
    })
}

// ── Observers ─────────────────────────────────────────────────────────────────

/// Records every state change the server session accepts.
#[derive(Default)]
pub struct RecordingObserver {
    pub changes: Mutex<Vec<StateChange>>,
}

impl StateObserver for RecordingObserver {
    fn state_changed(&self, change: StateChange) {
        self.changes.lock().expect("observer lock").push(change);
    }
}
