//! Reply ordering over parallel simulation advancement.
//!
//! The protocol loop is single-threaded; advancing the simulation is the
//! expensive part. A manager shields the loop from that cost: the calling
//! thread feeds requested agent IDs in, workers advance agents in parallel,
//! and the reply bytes still come out in the exact order the IDs went in.
//!
//! Lock order where both are held: the pool state mutex first, the
//! total-work mutex inside it. Per-agent locks are leaves and cover the
//! advance-and-publish pair, so result order per agent follows production
//! order even when an agent is handed from one worker to another.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};

use roam_core::error::{ProtocolError, Result};
use roam_core::framing::FrameBuf;
use roam_core::wire::FeatureSet;
use roam_core::Update;

use crate::mobility::Mobility;

/// Dispatches a LOCATION_REQUEST's ID stream to the simulation.
///
/// The session must have opened a read frame covering the IDs and a write
/// frame covering the reply before calling `handle_request`.
pub enum Manager {
    Simple(SimpleManager),
    Multi(MultiManager),
}

impl Manager {
    /// Pick the strategy for this connection. A single worker, or a
    /// simulation too small to parallelise, runs on the calling thread.
    pub fn new(sim: Arc<dyn Mobility>, workers: usize) -> Manager {
        if workers <= 1 || sim.num_agents() <= 1 {
            Manager::Simple(SimpleManager::new(sim))
        } else {
            let workers = workers.min(sim.num_agents() as usize);
            Manager::Multi(MultiManager::new(sim, workers))
        }
    }

    pub fn handle_request<S: Read + Write>(
        &mut self,
        io: &mut FrameBuf<S>,
        count: u32,
        features: FeatureSet,
    ) -> Result<()> {
        match self {
            Manager::Simple(m) => m.handle_request(io, count, features),
            Manager::Multi(m) => m.handle_request(io, count, features),
        }
    }

    /// Stop the workers and discard in-flight work.
    pub fn shutdown(&mut self) {
        if let Manager::Multi(m) = self {
            m.shutdown();
        }
    }
}

fn check_agent(id: u32, num_agents: u32) -> Result<u32> {
    if id >= num_agents {
        return Err(ProtocolError::InvalidNumAgents(id));
    }
    Ok(id)
}

// ── Simple manager ────────────────────────────────────────────────────────────

/// Synchronous strategy: advance on the calling thread, write each reply in
/// place as its ID is read.
pub struct SimpleManager {
    sim: Arc<dyn Mobility>,
    /// Pre-seeded with each agent's time-zero update at construction.
    results: Vec<VecDeque<Update>>,
}

impl SimpleManager {
    fn new(sim: Arc<dyn Mobility>) -> SimpleManager {
        let results = (0..sim.num_agents())
            .map(|agent| VecDeque::from([sim.current(agent)]))
            .collect();
        SimpleManager { sim, results }
    }

    fn handle_request<S: Read + Write>(
        &mut self,
        io: &mut FrameBuf<S>,
        count: u32,
        features: FeatureSet,
    ) -> Result<()> {
        for _ in 0..count {
            let id = check_agent(io.read_u32()?, self.sim.num_agents())?;
            let update = self.results[id as usize]
                .pop_front()
                .unwrap_or_else(|| self.sim.advance(id));
            update.write_to(io, features)?;
        }
        Ok(())
    }
}

// ── Multi manager ─────────────────────────────────────────────────────────────

struct PoolState {
    /// Agents with newly outstanding work, each entry waking one worker.
    work_to_do: VecDeque<u32>,
    /// Updates still to produce per agent. Starts at -1: the pre-seeded
    /// time-zero result satisfies one request without any production.
    num_required: Vec<i64>,
}

struct Shared {
    sim: Arc<dyn Mobility>,
    state: Mutex<PoolState>,
    work_cv: Condvar,
    /// Per-agent result queues, pre-seeded with the time-zero update.
    results: Vec<Mutex<VecDeque<Update>>>,
    /// Productions outstanding across all agents: Σ max(num_required, 0).
    total_work: Mutex<u64>,
    done_cv: Condvar,
    kill: AtomicBool,
}

/// Parallel strategy: N workers advance agents concurrently while the
/// calling thread accumulates the order, then drains replies in FIFO
/// request order once all production has finished.
pub struct MultiManager {
    shared: Arc<Shared>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl MultiManager {
    fn new(sim: Arc<dyn Mobility>, workers: usize) -> MultiManager {
        let num_agents = sim.num_agents() as usize;
        let results = (0..num_agents as u32)
            .map(|agent| Mutex::new(VecDeque::from([sim.current(agent)])))
            .collect();

        let shared = Arc::new(Shared {
            sim,
            state: Mutex::new(PoolState {
                work_to_do: VecDeque::new(),
                num_required: vec![-1; num_agents],
            }),
            work_cv: Condvar::new(),
            results,
            total_work: Mutex::new(0),
            done_cv: Condvar::new(),
            kill: AtomicBool::new(false),
        });

        let handles = (0..workers)
            .map(|i| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("roam-worker-{i}"))
                    .spawn(move || worker_loop(shared))
                    .unwrap_or_else(|e| panic!("cannot spawn worker thread: {e}"))
            })
            .collect();

        MultiManager { shared, handles }
    }

    fn handle_request<S: Read + Write>(
        &mut self,
        io: &mut FrameBuf<S>,
        count: u32,
        features: FeatureSet,
    ) -> Result<()> {
        let num_agents = self.shared.sim.num_agents();
        let mut order = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let id = check_agent(io.read_u32()?, num_agents)?;
            order.push(id);

            let mut state = self.shared.state.lock();
            state.num_required[id as usize] += 1;
            if state.num_required[id as usize] == 1 {
                state.work_to_do.push_back(id);
                self.shared.work_cv.notify_one();
            }
            if state.num_required[id as usize] >= 1 {
                *self.shared.total_work.lock() += 1;
            }
        }

        // Wait for the pool to go quiescent, then drain in request order.
        {
            let mut total = self.shared.total_work.lock();
            while *total != 0 && !self.shared.kill.load(Ordering::Acquire) {
                self.shared.done_cv.wait(&mut total);
            }
        }
        if self.shared.kill.load(Ordering::Acquire) {
            return Ok(());
        }

        for id in order {
            let update = self.shared.results[id as usize]
                .lock()
                .pop_front()
                .expect("result queue empty after total_work drained");
            update.write_to(io, features)?;
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.shared.kill.store(true, Ordering::Release);
        {
            let _state = self.shared.state.lock();
            self.shared.work_cv.notify_all();
        }
        {
            let _total = self.shared.total_work.lock();
            self.shared.done_cv.notify_all();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for MultiManager {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.shutdown();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        // Block until some agent has outstanding work.
        let agent = {
            let mut state = shared.state.lock();
            loop {
                if shared.kill.load(Ordering::Acquire) {
                    return;
                }
                if let Some(agent) = state.work_to_do.pop_front() {
                    break agent;
                }
                shared.work_cv.wait(&mut state);
            }
        };

        // Stay with this agent while it has demand; claim one production at
        // a time so a handoff to another worker never overlaps a claim.
        loop {
            {
                let mut state = shared.state.lock();
                if shared.kill.load(Ordering::Acquire) {
                    return;
                }
                if state.num_required[agent as usize] <= 0 {
                    break;
                }
                state.num_required[agent as usize] -= 1;
            }

            // Advance and publish under the agent's result lock: the pair
            // must be atomic for timestamps to stay ordered across workers.
            {
                let mut results = shared.results[agent as usize].lock();
                let update = shared.sim.advance(agent);
                results.push_back(update);
            }

            let mut total = shared.total_work.lock();
            *total -= 1;
            if *total == 0 {
                shared.done_cv.notify_all();
            }
        }
    }
}
