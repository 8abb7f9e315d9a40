//! The peer-independent handshake.
//!
//! Nine bytes in each direction (tag, version bitmap, feature bitmap),
//! then a single VERSION_CHOICE byte each way: `0x00` to reject, or a bitmap
//! with exactly one version bit set. Both sides compute the choice
//! independently and must land on the same bit.
//!
//! The feature rule is asymmetric: a client refuses a server advertising any
//! feature the client did not offer, while a server accepts any subset of
//! its own advertisement. Either way both peers resolve to the same
//! intersection before the first update crosses the wire.

use std::io::{Read, Write};

use zerocopy::byteorder::U32;
use zerocopy::{AsBytes, FromBytes};

use crate::error::{ProtocolError, Result};
use crate::framing::FrameBuf;
use crate::wire::{FeatureSet, Hello, Variant, HELLO_SIZE, VERSION_TWO};

/// VERSION_CHOICE byte rejecting the handshake.
const CHOICE_REJECT: u8 = 0x00;

/// Which side of the exchange this peer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// The outcome of a successful handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// The agreed version bitmap with exactly one bit set.
    pub version: u8,
    /// The feature set governing every subsequent update frame.
    pub features: FeatureSet,
}

/// Run the handshake over `io`, offering `offered` features.
pub fn negotiate<S: Read + Write>(
    io: &mut FrameBuf<S>,
    role: Role,
    variant: Variant,
    offered: FeatureSet,
) -> Result<Negotiated> {
    let hello = Hello {
        tag: variant.tag(),
        versions: VERSION_TWO,
        features: U32::new(offered.bits()),
    };
    io.begin_write(HELLO_SIZE);
    io.write_all(hello.as_bytes())?;

    let mut peer_bytes = [0u8; HELLO_SIZE as usize];
    io.begin_read(HELLO_SIZE);
    io.read_exact(&mut peer_bytes)?;
    let Some(peer) = Hello::read_from(&peer_bytes[..]) else {
        send_rejection(io);
        return Err(ProtocolError::ServerUnknownHandshake);
    };

    match Variant::from_tag(&peer.tag) {
        Some(v) if v == variant => {}
        Some(_) => {
            send_rejection(io);
            return Err(tag_mismatch(variant, role));
        }
        None => {
            send_rejection(io);
            return Err(ProtocolError::ServerUnknownHandshake);
        }
    }

    let peer_features = match FeatureSet::from_bits(peer.features.get()) {
        Ok(f) => f,
        Err(e) => {
            send_rejection(io);
            return Err(e);
        }
    };

    let shared = VERSION_TWO & peer.versions;
    if shared == 0 {
        send_rejection(io);
        return Err(ProtocolError::NoSharedVersion);
    }

    if role == Role::Client && !offered.contains(peer_features) {
        send_rejection(io);
        return Err(if peer_features.three_d && !offered.three_d {
            ProtocolError::ThreeDClientMismatch
        } else {
            ProtocolError::AddRemoveUnsupported
        });
    }

    // Highest shared bit; with only version 2 defined this is always 0x80.
    let choice = 0x80u8 >> shared.leading_zeros();
    io.begin_write(1);
    io.write_u8(choice)?;

    io.begin_read(1);
    let peer_choice = io.read_u8()?;
    if peer_choice == CHOICE_REJECT {
        return Err(match role {
            Role::Client => ProtocolError::ServerRejectedHandshake,
            Role::Server => ProtocolError::ServerClientVersionDisagree,
        });
    }
    if peer_choice != choice {
        return Err(ProtocolError::ServerClientVersionDisagree);
    }

    let features = match role {
        Role::Client => peer_features,
        Role::Server => offered.intersect(peer_features),
    };

    tracing::debug!(
        version = choice,
        three_d = features.three_d,
        appearance = features.appearance,
        "handshake complete"
    );

    Ok(Negotiated {
        version: choice,
        features,
    })
}

/// Send the rejection choice byte. The connection is already doomed, so a
/// delivery failure only gets logged.
fn send_rejection<S: Read + Write>(io: &mut FrameBuf<S>) {
    io.begin_write(1);
    if let Err(e) = io.write_u8(CHOICE_REJECT) {
        tracing::debug!(error = %e, "rejection byte not delivered");
    }
}

fn tag_mismatch(variant: Variant, role: Role) -> ProtocolError {
    match (variant, role) {
        (Variant::Uamp, Role::Client) | (Variant::Mvisp, Role::Server) => {
            ProtocolError::UampClientMvispServer
        }
        _ => ProtocolError::MvispClientUampServer,
    }
}
