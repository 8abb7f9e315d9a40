//! The listening socket and the accept loop.
//!
//! Binding retries on a fixed interval for a bounded number of attempts, so
//! a restart can outwait a predecessor's lingering socket. Each accepted
//! connection gets its own session thread; accept failures are logged and
//! the daemon keeps serving.

use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use socket2::{Domain, Socket, Type};

use roam_core::config::RoamConfig;
use roam_core::error::{ProtocolError, Result};
use roam_core::wire::{FeatureSet, SimulationOffer, Variant};

use crate::session::{run_session, MvispServer, StateObserver, UampServer};

/// Bind the listening socket, retrying on a fixed interval.
pub fn bind_with_retry(port: u16, retries: u32, interval: Duration) -> Result<TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let mut attempt = 0;
    loop {
        attempt += 1;
        match try_bind(addr) {
            Ok(listener) => {
                tracing::info!(port, "listening");
                return Ok(listener);
            }
            Err(e) if attempt < retries.max(1) => {
                tracing::warn!(port, attempt, error = %e, "bind failed, retrying");
                thread::sleep(interval);
            }
            Err(e) => return Err(ProtocolError::SocketCreate(e)),
        }
    }
}

fn try_bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    Ok(socket.into())
}

/// One serving instance: configuration plus the MVISP state-change sink.
pub struct Server {
    pub config: RoamConfig,
    pub observer: Arc<dyn StateObserver>,
}

impl Server {
    /// The protocol variant named by the config, if recognised.
    pub fn variant(&self) -> Option<Variant> {
        match self.config.server.protocol.as_str() {
            "uamp" => Some(Variant::Uamp),
            "mvisp" => Some(Variant::Mvisp),
            _ => None,
        }
    }

    fn advertised(&self) -> FeatureSet {
        FeatureSet {
            three_d: self.config.server.three_d,
            appearance: self.config.server.appearance,
        }
    }

    fn worker_threads(&self) -> usize {
        match self.config.server.worker_threads {
            0 => thread::available_parallelism().map(usize::from).unwrap_or(1),
            n => n as usize,
        }
    }

    /// Accept connections forever, one session thread per connection.
    pub fn run(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    tracing::info!(%peer, "connection accepted");
                    let server = self.clone();
                    let spawned = thread::Builder::new()
                        .name(format!("roam-session-{peer}"))
                        .spawn(move || server.serve_one(stream, peer));
                    if let Err(e) = spawned {
                        tracing::error!(error = %e, "cannot spawn session thread");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            }
        }
    }

    fn serve_one(&self, stream: std::net::TcpStream, peer: SocketAddr) {
        let advertised = self.advertised();
        let workers = self.worker_threads();
        let mobility = &self.config.mobility;

        let result = match self.variant() {
            Some(Variant::Uamp) => {
                run_session(stream, &mut UampServer, advertised, workers, mobility)
            }
            Some(Variant::Mvisp) => {
                let offer = SimulationOffer {
                    num_agents: self.config.mobility.agents,
                    time_limit_ms: (self.config.mobility.duration_s * 1000.0).round() as u32,
                };
                let mut variant = MvispServer::new(offer, self.observer.clone());
                run_session(stream, &mut variant, advertised, workers, mobility)
            }
            None => {
                tracing::error!(protocol = %self.config.server.protocol, "unknown protocol");
                return;
            }
        };

        match result {
            Ok(()) => tracing::info!(%peer, "session closed"),
            Err(e) => tracing::warn!(%peer, error = %e, "session failed"),
        }
    }
}
