use crate::*;

use std::net::TcpStream as RawStream;

use roam_core::framing::FrameBuf;
use roam_core::handshake::{negotiate, Role};
use roam_core::wire::{FeatureSet, Variant, OP_LOCATION_REQUEST, OP_TERMINATE};
use roam_core::Update;

/// Drive one UAMP session by hand: handshake, spec, a single
/// LOCATION_REQUEST for `ids`, terminate. Returns the raw reply updates in
/// wire order.
fn raw_location_request(addr: &str, num_agents: u32, ids: &[u32]) -> Vec<Update> {
    let stream = RawStream::connect(addr).expect("connect");
    let mut io = FrameBuf::new(stream);
    let session =
        negotiate(&mut io, Role::Client, Variant::Uamp, FeatureSet::default()).expect("handshake");

    io.begin_write(12);
    io.write_u32(num_agents).unwrap();
    io.write_u32(600_000).unwrap(); // long enough that nothing goes terminal
    io.write_u32(1).unwrap();
    io.begin_read(1);
    assert_eq!(io.read_u8().unwrap(), 0x00);

    io.begin_write(5 + 4 * ids.len() as u64);
    io.write_u8(OP_LOCATION_REQUEST).unwrap();
    io.write_u32(ids.len() as u32).unwrap();
    for &id in ids {
        io.write_u32(id).unwrap();
    }

    io.begin_read(ids.len() as u64 * session.features.update_size());
    let updates = ids
        .iter()
        .map(|_| Update::read_from(&mut io, session.features).expect("update"))
        .collect();

    io.begin_write(5);
    io.write_u8(OP_TERMINATE).unwrap();
    io.write_u32(0).unwrap();
    updates
}

#[test]
fn replies_come_back_in_request_position_order() {
    let ids = [3, 0, 3, 1, 2, 3];
    let (addr, server) = spawn_uamp_server(FeatureSet::default(), 4);
    let updates = raw_location_request(&addr, 4, &ids);
    server.join().expect("server thread").unwrap();

    assert_eq!(updates.len(), 6);
    // First sight of each agent is its time-zero update.
    assert_eq!(updates[0].time_ms, 0); // agent 3
    assert_eq!(updates[1].time_ms, 0); // agent 0
    assert_eq!(updates[3].time_ms, 0); // agent 1
    assert_eq!(updates[4].time_ms, 0); // agent 2
    // Agent 3's second and third updates advance strictly.
    assert!(updates[2].time_ms > updates[0].time_ms);
    assert!(updates[5].time_ms > updates[2].time_ms);
}

#[test]
fn the_reply_stream_is_identical_for_any_worker_count() {
    let ids = [1, 1, 0, 2, 1, 0, 2, 2, 1, 0, 0, 1];

    let (addr, server) = spawn_uamp_server(FeatureSet::default(), 1);
    let baseline = raw_location_request(&addr, 3, &ids);
    server.join().expect("server thread").unwrap();

    for workers in [2, 4, 8] {
        let (addr, server) = spawn_uamp_server(FeatureSet::default(), workers);
        let replies = raw_location_request(&addr, 3, &ids);
        server.join().expect("server thread").unwrap();
        assert_eq!(replies, baseline, "{workers} workers changed the stream");
    }
}

#[test]
fn requests_spanning_several_frames_stay_ordered() {
    let (addr, server) = spawn_uamp_server(FeatureSet::default(), 4);

    // Three back-to-back requests on one session; timestamps per agent must
    // keep rising across the request boundary.
    let stream = RawStream::connect(&addr).expect("connect");
    let mut io = FrameBuf::new(stream);
    let session =
        negotiate(&mut io, Role::Client, Variant::Uamp, FeatureSet::default()).expect("handshake");

    io.begin_write(12);
    io.write_u32(2).unwrap();
    io.write_u32(600_000).unwrap();
    io.write_u32(7).unwrap();
    io.begin_read(1);
    assert_eq!(io.read_u8().unwrap(), 0x00);

    let mut last = [None::<u32>; 2];
    for _ in 0..3 {
        let ids = [0, 1, 0, 1];
        io.begin_write(5 + 4 * ids.len() as u64);
        io.write_u8(OP_LOCATION_REQUEST).unwrap();
        io.write_u32(ids.len() as u32).unwrap();
        for &id in &ids {
            io.write_u32(id).unwrap();
        }

        io.begin_read(ids.len() as u64 * session.features.update_size());
        for &id in &ids {
            let update = Update::read_from(&mut io, session.features).expect("update");
            if let Some(prev) = last[id as usize] {
                assert!(update.time_ms > prev, "agent {id} regressed");
            }
            last[id as usize] = Some(update.time_ms);
        }
    }

    io.begin_write(5);
    io.write_u8(OP_TERMINATE).unwrap();
    io.write_u32(0).unwrap();
    server.join().expect("server thread").unwrap();
}
