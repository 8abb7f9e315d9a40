//! Roam wire format — on-wire constants and fixed-layout frames.
//!
//! These values ARE the protocol. Every tag byte, opcode, and feature bit is
//! fixed by the negotiated version; changing anything here breaks
//! compatibility with every deployed peer.
//!
//! All multi-byte integers on the wire are big-endian unsigned 32-bit values.
//! Units on the wire are milliseconds and millimetres; `libroam` converts to
//! seconds and metres at the API boundary.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::ProtocolError;

// ── Protocol identity ─────────────────────────────────────────────────────────

/// The two protocol variants sharing the common framing and handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Universal Agent Mobility Protocol — the client requests a simulation,
    /// the server streams mobility updates.
    Uamp,
    /// Mobility Visualisation/State Protocol — the server publishes an
    /// existing simulation, the client may emit state changes back.
    Mvisp,
}

impl Variant {
    /// The 4-byte ASCII tag opening the handshake hello.
    pub fn tag(self) -> [u8; 4] {
        match self {
            Variant::Uamp => *b"UAMP",
            Variant::Mvisp => *b"MVIS",
        }
    }

    /// Classify a received tag. `None` for tags no version of the protocol
    /// has ever used.
    pub fn from_tag(tag: &[u8; 4]) -> Option<Variant> {
        match tag {
            b"UAMP" => Some(Variant::Uamp),
            b"MVIS" => Some(Variant::Mvisp),
            _ => None,
        }
    }
}

/// Version bitmap bit for protocol version 2, the only defined version.
pub const VERSION_TWO: u8 = 0x80;

// ── Feature bits ──────────────────────────────────────────────────────────────

/// Feature bit: updates carry a third coordinate.
pub const FEATURE_3D: u32 = 0x8000_0000;

/// Feature bit: agents may appear and disappear; updates carry a present flag.
pub const FEATURE_APPEARANCE: u32 = 0x4000_0000;

const FEATURE_MASK: u32 = FEATURE_3D | FEATURE_APPEARANCE;

/// The optional capabilities negotiated during the handshake.
///
/// The wire layout of every update depends on this set, so both peers must
/// resolve to the same value before the first LOCATION_REQUEST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureSet {
    pub three_d: bool,
    pub appearance: bool,
}

impl FeatureSet {
    /// Decode a feature bitmap. Bits outside the defined set are a protocol
    /// error — a peer advertising them speaks a future dialect we cannot.
    pub fn from_bits(bits: u32) -> Result<FeatureSet, ProtocolError> {
        if bits & !FEATURE_MASK != 0 {
            return Err(ProtocolError::InvalidFeatures(bits));
        }
        Ok(FeatureSet {
            three_d: bits & FEATURE_3D != 0,
            appearance: bits & FEATURE_APPEARANCE != 0,
        })
    }

    pub fn bits(self) -> u32 {
        let mut bits = 0;
        if self.three_d {
            bits |= FEATURE_3D;
        }
        if self.appearance {
            bits |= FEATURE_APPEARANCE;
        }
        bits
    }

    /// True if every feature in `other` is also in `self`.
    pub fn contains(self, other: FeatureSet) -> bool {
        (!other.three_d || self.three_d) && (!other.appearance || self.appearance)
    }

    pub fn intersect(self, other: FeatureSet) -> FeatureSet {
        FeatureSet {
            three_d: self.three_d && other.three_d,
            appearance: self.appearance && other.appearance,
        }
    }

    /// Bytes one update occupies on the wire under this feature set:
    /// time, x, y, optionally z, optionally the present flag.
    pub fn update_size(self) -> u64 {
        12 + if self.three_d { 4 } else { 0 } + if self.appearance { 1 } else { 0 }
    }
}

// ── Handshake hello ───────────────────────────────────────────────────────────

/// The 9-byte hello each peer sends to open the handshake.
///
/// Wire size: 9 bytes. Followed in each direction by a single VERSION_CHOICE
/// byte — `0x00` to reject, or a bitmap with exactly one version bit set.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct Hello {
    /// Protocol tag — ASCII `"UAMP"` or `"MVIS"`.
    pub tag: [u8; 4],

    /// Version bitmap. Bit 7 = version 2, the only defined version.
    pub versions: u8,

    /// Feature bitmap. Bit 31 = 3D coordinates, bit 30 = appear/disappear.
    pub features: U32<BigEndian>,
}

// Compile-time size guard. The handshake reads exactly this many bytes.
assert_eq_size!(Hello, [u8; 9]);

pub const HELLO_SIZE: u64 = 9;

// ── Commands ──────────────────────────────────────────────────────────────────

/// Terminate the connection. Operand: a 32-bit zero.
pub const OP_TERMINATE: u8 = 0x00;

/// Request updates. Operand: count, then count agent IDs, one per update.
pub const OP_LOCATION_REQUEST: u8 = 0x01;

/// MVISP client-to-server state changes. Operand: count, then count
/// (agent, time, state) triples.
pub const OP_CHANGE_STATE: u8 = 0x02;

// ── Limits ────────────────────────────────────────────────────────────────────

/// Simulations above this agent count are rejected at the spec exchange.
pub const MAX_AGENTS: u32 = 1_000_000;

/// Per-agent client lookahead. The queue must hold at least two updates for
/// interpolation to have an interval to work with.
pub const QUEUE_SIZE: usize = 6;

/// MVISP state-change buffer capacity; a full buffer flushes automatically.
pub const STATE_BUFFER_SIZE: usize = 128;

/// Longest permitted MVISP state name, in ASCII bytes.
pub const MAX_STATE_NAME: usize = 1024;

/// Upper bound on the MVISP state-table count so a hostile peer cannot force
/// an enormous allocation before validation.
pub const MAX_STATES: u32 = 65_535;

// ── Spec-exchange payloads ────────────────────────────────────────────────────

/// The simulation a UAMP client asks the server to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationSpec {
    pub num_agents: u32,
    pub time_limit_ms: u32,
    pub seed: u32,
}

/// The simulation an MVISP server offers to publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationOffer {
    pub num_agents: u32,
    pub time_limit_ms: u32,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::AsBytes;

    #[test]
    fn hello_layout_is_nine_big_endian_bytes() {
        let hello = Hello {
            tag: *b"UAMP",
            versions: VERSION_TWO,
            features: U32::new(FEATURE_3D | FEATURE_APPEARANCE),
        };
        let bytes = hello.as_bytes();
        assert_eq!(bytes, &[0x55, 0x41, 0x4D, 0x50, 0x80, 0xC0, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn hello_round_trip() {
        let hello = Hello {
            tag: *b"MVIS",
            versions: VERSION_TWO,
            features: U32::new(FEATURE_APPEARANCE),
        };
        let recovered = Hello::read_from(hello.as_bytes()).unwrap();
        assert_eq!(recovered.tag, *b"MVIS");
        assert_eq!(recovered.versions, VERSION_TWO);
        assert_eq!(recovered.features.get(), FEATURE_APPEARANCE);
    }

    #[test]
    fn tag_classification() {
        assert_eq!(Variant::from_tag(b"UAMP"), Some(Variant::Uamp));
        assert_eq!(Variant::from_tag(b"MVIS"), Some(Variant::Mvisp));
        assert_eq!(Variant::from_tag(b"HTTP"), None);
    }

    #[test]
    fn feature_bits_round_trip() {
        for bits in [0, FEATURE_3D, FEATURE_APPEARANCE, FEATURE_MASK] {
            let set = FeatureSet::from_bits(bits).unwrap();
            assert_eq!(set.bits(), bits);
        }
    }

    #[test]
    fn undefined_feature_bits_are_rejected() {
        assert!(matches!(
            FeatureSet::from_bits(0x0000_0001),
            Err(ProtocolError::InvalidFeatures(1))
        ));
    }

    #[test]
    fn update_size_tracks_features() {
        assert_eq!(FeatureSet::default().update_size(), 12);
        assert_eq!(FeatureSet { three_d: true, appearance: false }.update_size(), 16);
        assert_eq!(FeatureSet { three_d: false, appearance: true }.update_size(), 13);
        assert_eq!(FeatureSet { three_d: true, appearance: true }.update_size(), 17);
    }

    #[test]
    fn containment_and_intersection() {
        let all = FeatureSet { three_d: true, appearance: true };
        let flat = FeatureSet { three_d: false, appearance: true };
        assert!(all.contains(flat));
        assert!(!flat.contains(all));
        assert_eq!(all.intersect(flat), flat);
    }
}
