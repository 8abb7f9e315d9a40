//! The update data model shared by both peers.
//!
//! An `Update` is one discrete observation of one agent in server units
//! (milliseconds, millimetres). A `Command` is the client-facing interval
//! view spanning two successive updates, in SI units (seconds, metres).

use std::io::{Read, Write};

use crate::error::{ProtocolError, Result};
use crate::framing::FrameBuf;
use crate::wire::FeatureSet;

// ── Update ────────────────────────────────────────────────────────────────────

/// One `(time, x, y, z, present)` observation of an agent.
///
/// `z_mm` is zero unless the 3D feature was negotiated; `present` is true
/// unless the appear/disappear feature was negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Update {
    pub time_ms: u32,
    pub x_mm: u32,
    pub y_mm: u32,
    pub z_mm: u32,
    pub present: bool,
}

impl Update {
    pub fn time_s(&self) -> f64 {
        self.time_ms as f64 / 1000.0
    }

    pub fn x_m(&self) -> f64 {
        self.x_mm as f64 / 1000.0
    }

    pub fn y_m(&self) -> f64 {
        self.y_mm as f64 / 1000.0
    }

    pub fn z_m(&self) -> f64 {
        self.z_mm as f64 / 1000.0
    }

    /// Read one update off the wire under the negotiated feature set.
    pub fn read_from<S: Read + Write>(
        io: &mut FrameBuf<S>,
        features: FeatureSet,
    ) -> Result<Update> {
        let time_ms = io.read_u32()?;
        let x_mm = io.read_u32()?;
        let y_mm = io.read_u32()?;
        let z_mm = if features.three_d { io.read_u32()? } else { 0 };
        let present = if features.appearance {
            match io.read_u8()? {
                0x00 => false,
                0x01 => true,
                other => return Err(ProtocolError::InvalidPresentFlag(other)),
            }
        } else {
            true
        };
        Ok(Update {
            time_ms,
            x_mm,
            y_mm,
            z_mm,
            present,
        })
    }

    /// Write one update to the wire under the negotiated feature set.
    pub fn write_to<S: Read + Write>(
        &self,
        io: &mut FrameBuf<S>,
        features: FeatureSet,
    ) -> Result<()> {
        io.write_u32(self.time_ms)?;
        io.write_u32(self.x_mm)?;
        io.write_u32(self.y_mm)?;
        if features.three_d {
            io.write_u32(self.z_mm)?;
        }
        if features.appearance {
            io.write_u8(self.present as u8)?;
        }
        Ok(())
    }
}

// ── Command ───────────────────────────────────────────────────────────────────

/// A derived interval spanning two successive updates of one agent.
///
/// For the initial command `from_time == to_time == 0` and the endpoints
/// coincide; every later command starts where the previous one ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    pub agent: u32,
    pub from_x: f64,
    pub from_y: f64,
    pub from_z: f64,
    pub from_time: f64,
    pub to_x: f64,
    pub to_y: f64,
    pub to_z: f64,
    pub to_time: f64,
    pub present: bool,
}

impl Command {
    /// The command spanning `previous` to `current` without interpolation.
    pub fn between(agent: u32, previous: &Update, current: &Update) -> Command {
        Command {
            agent,
            from_x: previous.x_m(),
            from_y: previous.y_m(),
            from_z: previous.z_m(),
            from_time: previous.time_s(),
            to_x: current.x_m(),
            to_y: current.y_m(),
            to_z: current.z_m(),
            to_time: current.time_s(),
            present: previous.present,
        }
    }
}

// ── State change ──────────────────────────────────────────────────────────────

/// One buffered MVISP client-to-server state notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub agent: u32,
    pub time_ms: u32,
    pub state: u32,
}

/// Round a client-supplied time in seconds to wire milliseconds.
pub fn millis(seconds: f64) -> u64 {
    (seconds * 1000.0).round() as u64
}
