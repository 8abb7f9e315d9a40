//! The mobility simulation behind the protocol core.
//!
//! The request machinery only needs a producer of per-agent updates; the
//! `Mobility` trait is that seam. The built-in `Waypoint` model walks each
//! agent across a bounded map: pick a destination uniformly, travel at a
//! sampled speed, pause for a sampled time, repeat. Updates are quantised to
//! a fixed step, the final update lands exactly on the duration, and every
//! advance past the end repeats the terminal byte-for-byte.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use roam_core::config::MobilityConfig;
use roam_core::Update;

/// A producer of agent updates. Implementations serialise per-agent access
/// internally; distinct agents may be advanced from distinct threads.
pub trait Mobility: Send + Sync {
    fn num_agents(&self) -> u32;
    fn duration_ms(&self) -> u32;
    /// The agent's most recently produced update.
    fn current(&self, agent: u32) -> Update;
    /// Produce the agent's next update.
    fn advance(&self, agent: u32) -> Update;
}

// ── Waypoint model ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Params {
    width_mm: f64,
    height_mm: f64,
    depth_mm: f64,
    /// mm per ms, numerically equal to m/s.
    speed_min: f64,
    speed_max: f64,
    pause_min_ms: f64,
    pause_max_ms: f64,
    step_ms: u32,
    appearance: bool,
}

/// Random-waypoint mobility on a rectangular (or boxed) map.
pub struct Waypoint {
    params: Params,
    duration_ms: u32,
    walkers: Vec<Mutex<Walker>>,
}

struct Walker {
    rng: StdRng,
    time_ms: u64,
    pos: [f64; 3],
    dest: [f64; 3],
    speed: f64,
    pause_left_ms: f64,
    present: bool,
    update: Update,
    done: bool,
}

impl Waypoint {
    /// Build a simulation of `num_agents` agents for `duration_ms`,
    /// deterministically derived from `seed`.
    pub fn new(
        config: &MobilityConfig,
        three_d: bool,
        appearance: bool,
        num_agents: u32,
        duration_ms: u32,
        seed: u32,
    ) -> Waypoint {
        let speed_min = config.speed_min_mps.max(0.001);
        let pause_min_ms = (config.pause_min_s * 1000.0).max(0.0);
        let params = Params {
            width_mm: (config.map_width_m * 1000.0).max(1.0),
            height_mm: (config.map_height_m * 1000.0).max(1.0),
            depth_mm: if three_d {
                (config.map_depth_m * 1000.0).max(0.0)
            } else {
                0.0
            },
            speed_min,
            speed_max: config.speed_max_mps.max(speed_min),
            pause_min_ms,
            pause_max_ms: (config.pause_max_s * 1000.0).max(pause_min_ms),
            step_ms: config.step_ms.max(1),
            appearance,
        };

        let walkers = (0..num_agents)
            .map(|agent| Mutex::new(Walker::new(&params, duration_ms, seed, agent)))
            .collect();

        Waypoint {
            params,
            duration_ms,
            walkers,
        }
    }
}

impl Mobility for Waypoint {
    fn num_agents(&self) -> u32 {
        self.walkers.len() as u32
    }

    fn duration_ms(&self) -> u32 {
        self.duration_ms
    }

    fn current(&self, agent: u32) -> Update {
        self.walkers[agent as usize].lock().update
    }

    fn advance(&self, agent: u32) -> Update {
        let mut walker = self.walkers[agent as usize].lock();
        walker.advance(&self.params, self.duration_ms)
    }
}

impl Walker {
    fn new(params: &Params, duration_ms: u32, seed: u32, agent: u32) -> Walker {
        // SplitMix-style spread so neighbouring agents do not correlate.
        let mixed = (seed as u64)
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add((agent as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9));
        let mut rng = StdRng::seed_from_u64(mixed);

        let pos = [
            rng.gen_range(0.0..=params.width_mm),
            rng.gen_range(0.0..=params.height_mm),
            rng.gen_range(0.0..=params.depth_mm.max(0.0)),
        ];
        let dest = Self::pick_destination(&mut rng, params);
        let speed = rng.gen_range(params.speed_min..=params.speed_max);

        let update = Update {
            time_ms: 0,
            x_mm: pos[0].round() as u32,
            y_mm: pos[1].round() as u32,
            z_mm: pos[2].round() as u32,
            present: true,
        };

        Walker {
            rng,
            time_ms: 0,
            pos,
            dest,
            speed,
            pause_left_ms: 0.0,
            present: true,
            update,
            done: duration_ms == 0,
        }
    }

    fn pick_destination(rng: &mut StdRng, params: &Params) -> [f64; 3] {
        [
            rng.gen_range(0.0..=params.width_mm),
            rng.gen_range(0.0..=params.height_mm),
            rng.gen_range(0.0..=params.depth_mm.max(0.0)),
        ]
    }

    fn advance(&mut self, params: &Params, duration_ms: u32) -> Update {
        if self.done {
            return self.update;
        }

        let next_ms = (self.time_ms + params.step_ms as u64).min(duration_ms as u64);
        self.integrate((next_ms - self.time_ms) as f64, params);
        self.time_ms = next_ms;
        if next_ms == duration_ms as u64 {
            self.done = true;
        }

        self.update = Update {
            time_ms: next_ms as u32,
            x_mm: self.pos[0].round() as u32,
            y_mm: self.pos[1].round() as u32,
            z_mm: self.pos[2].round() as u32,
            present: self.present,
        };
        self.update
    }

    /// Move the walker `dt` milliseconds along its itinerary.
    fn integrate(&mut self, mut dt: f64, params: &Params) {
        while dt > 1e-9 {
            if self.pause_left_ms > 0.0 {
                let waited = dt.min(self.pause_left_ms);
                self.pause_left_ms -= waited;
                dt -= waited;
                if self.pause_left_ms <= 0.0 {
                    self.present = true;
                }
                continue;
            }

            let delta = [
                self.dest[0] - self.pos[0],
                self.dest[1] - self.pos[1],
                self.dest[2] - self.pos[2],
            ];
            let distance = (delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2]).sqrt();

            if distance < 1e-9 {
                // Arrived: pause, then head somewhere new.
                self.pause_left_ms = self
                    .rng
                    .gen_range(params.pause_min_ms..=params.pause_max_ms);
                if params.appearance && self.pause_left_ms > 0.0 {
                    // Occasionally the agent leaves the map while paused.
                    self.present = self.rng.gen_range(0..10) != 0;
                }
                self.dest = Self::pick_destination(&mut self.rng, params);
                self.speed = self.rng.gen_range(params.speed_min..=params.speed_max);
                continue;
            }

            let travel = self.speed * dt;
            if travel >= distance {
                self.pos = self.dest;
                dt -= distance / self.speed;
            } else {
                let scale = travel / distance;
                self.pos[0] += delta[0] * scale;
                self.pos[1] += delta[1] * scale;
                self.pos[2] += delta[2] * scale;
                dt = 0.0;
            }
        }
    }
}
