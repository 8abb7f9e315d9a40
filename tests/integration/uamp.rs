use crate::*;

use libroam::{Command, SimulationSpec, UampClient};
use roam_core::error::ProtocolError;
use roam_core::wire::FeatureSet;

fn connect(addr: &str, num_agents: u32, time_limit_ms: u32) -> UampClient {
    let spec = SimulationSpec {
        num_agents,
        time_limit_ms,
        seed: 1,
    };
    UampClient::connect(addr, spec, FeatureSet::default()).expect("connect")
}

#[test]
fn two_agents_stream_from_zero_to_the_duration() {
    let (addr, server) = spawn_uamp_server(FeatureSet::default(), 1);
    let mut client = connect(&addr, 2, 2000);

    assert_eq!(client.num_agents(), 2);
    assert_eq!(client.duration(), 2.0);

    // The first command is degenerate at the initial point.
    let first = client.current_command(0);
    assert_eq!(first.from_time, 0.0);
    assert_eq!(first.to_time, 0.0);
    assert_eq!(first.from_x, first.to_x);
    assert_eq!(first.from_y, first.to_y);

    // One advance exposes the first real movement interval.
    client.advance(0).unwrap();
    let second = client.current_command(0);
    assert_eq!(second.from_time, 0.0);
    assert_eq!(second.to_time, 0.5);

    client.terminate().unwrap();
    server.join().expect("server thread").unwrap();
}

#[test]
fn commands_chain_monotonically_to_the_end() {
    let (addr, server) = spawn_uamp_server(FeatureSet::default(), 1);
    let mut client = connect(&addr, 2, 3000);

    let mut history: Vec<Command> = vec![client.current_command(0)];
    loop {
        match client.advance(0) {
            Ok(()) => history.push(client.current_command(0)),
            Err(ProtocolError::NoMoreData(0)) => break,
            Err(e) => panic!("advance failed: {e}"),
        }
    }

    assert_eq!(history[0].from_time, 0.0);
    assert_eq!(history[0].to_time, 0.0);
    for pair in history.windows(2) {
        assert_eq!(pair[1].from_time, pair[0].to_time);
        assert!(pair[1].to_time > pair[0].to_time);
        assert_eq!(pair[1].from_x, pair[0].to_x);
        assert_eq!(pair[1].from_y, pair[0].to_y);
    }
    assert_eq!(history.last().unwrap().to_time, 3.0);

    client.terminate().unwrap();
    server.join().expect("server thread").unwrap();
}

#[test]
fn the_synchronous_view_moves_one_window_at_a_time() {
    let (addr, server) = spawn_uamp_server(FeatureSet::default(), 2);
    let mut client = connect(&addr, 3, 2500);

    let mut last_to = 0.0;
    loop {
        let windows: Vec<Command> = (0..client.num_agents())
            .map(|agent| client.intersect_command(agent).expect("intersection"))
            .collect();

        // Every agent reports the identical window.
        for cmd in &windows {
            assert_eq!(cmd.from_time, windows[0].from_time);
            assert_eq!(cmd.to_time, windows[0].to_time);
            assert!(cmd.from_time <= cmd.to_time);
        }
        assert!(windows[0].to_time >= last_to);
        last_to = windows[0].to_time;

        match client.advance_oldest() {
            Ok(()) => {}
            Err(ProtocolError::NoMoreData(_)) => break,
            Err(e) => panic!("advance_oldest failed: {e}"),
        }
    }
    assert_eq!(last_to, 2.5);

    client.terminate().unwrap();
    server.join().expect("server thread").unwrap();
}

#[test]
fn negotiated_features_flow_through_the_stream() {
    let features = FeatureSet {
        three_d: true,
        appearance: true,
    };
    let (addr, server) = spawn_uamp_server(features, 2);

    let spec = SimulationSpec {
        num_agents: 2,
        time_limit_ms: 2000,
        seed: 5,
    };
    let mut client = UampClient::connect(&addr, spec, features).expect("connect");
    assert_eq!(client.features(), features);

    // Drain the whole stream; wire sizes and present flags must all parse.
    loop {
        match client.advance_oldest() {
            Ok(()) => {}
            Err(ProtocolError::NoMoreData(_)) => break,
            Err(e) => panic!("streaming failed: {e}"),
        }
    }

    client.terminate().unwrap();
    server.join().expect("server thread").unwrap();
}

#[test]
fn zero_agents_is_rejected_before_connecting() {
    let err = UampClient::connect(
        "127.0.0.1:1",
        SimulationSpec {
            num_agents: 0,
            time_limit_ms: 1000,
            seed: 1,
        },
        FeatureSet::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidNumAgents(0)));
}
