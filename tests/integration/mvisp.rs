use crate::*;

use std::sync::Arc;

use libroam::MvispClient;
use roam_core::error::ProtocolError;
use roam_core::wire::{FeatureSet, SimulationOffer};

fn offer(num_agents: u32, time_limit_ms: u32) -> SimulationOffer {
    SimulationOffer {
        num_agents,
        time_limit_ms,
    }
}

#[test]
fn offer_and_state_table_are_exchanged() {
    let observer = Arc::new(RecordingObserver::default());
    let (addr, server) = spawn_mvisp_server(offer(3, 10_000), observer, FeatureSet::default());

    let client = MvispClient::connect(&addr, FeatureSet::default(), |offer| {
        assert_eq!(offer.num_agents, 3);
        assert_eq!(offer.time_limit_ms, 10_000);
        Some(vec!["idle".to_string(), "busy".to_string()])
    })
    .expect("connect")
    .expect("accepted");

    assert_eq!(client.num_agents(), 3);
    assert_eq!(client.duration(), 10.0);
    assert_eq!(client.num_states(), 2);
    assert_eq!(client.state_name(0), "idle");
    assert_eq!(client.state_name(1), "busy");

    client.terminate().unwrap();
    server.join().expect("server thread").unwrap();
}

#[test]
fn a_full_buffer_flushes_one_frame_automatically() {
    let observer = Arc::new(RecordingObserver::default());
    let (addr, server) =
        spawn_mvisp_server(offer(3, 10_000), observer.clone(), FeatureSet::default());

    let mut client = MvispClient::connect(&addr, FeatureSet::default(), |_| {
        Some(vec!["idle".to_string(), "busy".to_string()])
    })
    .expect("connect")
    .expect("accepted");

    // 128 changes fill the buffer exactly and flush without being asked.
    for _ in 0..128 {
        client.change_state(1, 3.0, 1).unwrap();
    }

    // Force a request round-trip; the server handles frames in order, so
    // once the reply is back the CHANGE_STATE frame has been consumed.
    for _ in 0..7 {
        client.advance(0).unwrap();
    }

    {
        let seen = observer.changes.lock().unwrap();
        assert_eq!(seen.len(), 128);
        assert!(seen
            .iter()
            .all(|c| c.agent == 1 && c.time_ms == 3000 && c.state == 1));
    }

    // A partial buffer rides out with terminate.
    client.change_state(0, 4.5, 0).unwrap();
    client.change_state(2, 9.0, 1).unwrap();
    client.terminate().unwrap();
    server.join().expect("server thread").unwrap();

    let seen = observer.changes.lock().unwrap();
    assert_eq!(seen.len(), 130);
    assert_eq!(seen[128].agent, 0);
    assert_eq!(seen[128].time_ms, 4500);
    assert_eq!(seen[129].agent, 2);
    assert_eq!(seen[129].state, 1);
}

#[test]
fn change_state_validates_before_buffering() {
    let observer = Arc::new(RecordingObserver::default());
    let (addr, server) =
        spawn_mvisp_server(offer(2, 5_000), observer, FeatureSet::default());

    let mut client = MvispClient::connect(&addr, FeatureSet::default(), |_| {
        Some(vec!["idle".to_string()])
    })
    .expect("connect")
    .expect("accepted");

    let err = client.change_state(0, 5.001, 0).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidChangeTime(_)));

    let err = client.change_state(0, 1.0, 1).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidChangeState(1)));

    client.terminate().unwrap();
    server.join().expect("server thread").unwrap();
}

#[test]
fn an_offer_with_no_agents_is_fatal() {
    let observer = Arc::new(RecordingObserver::default());
    let (addr, server) = spawn_mvisp_server(offer(0, 5_000), observer, FeatureSet::default());

    let err = MvispClient::connect(&addr, FeatureSet::default(), |_| {
        panic!("the callback must not run for an empty offer");
    })
    .unwrap_err();
    assert!(matches!(err, ProtocolError::MvispNoAgents));

    // The client's 32-bit zero reads as a denial on the server.
    let server_err = server.join().expect("server thread").unwrap_err();
    assert!(matches!(server_err, ProtocolError::SimulationDenied));
}

#[test]
fn the_application_can_deny_the_offer() {
    let observer = Arc::new(RecordingObserver::default());
    let (addr, server) = spawn_mvisp_server(offer(2, 5_000), observer, FeatureSet::default());

    let denied = MvispClient::connect(&addr, FeatureSet::default(), |_| None).expect("connect");
    assert!(denied.is_none());

    let server_err = server.join().expect("server thread").unwrap_err();
    assert!(matches!(server_err, ProtocolError::SimulationDenied));
}
