use crate::*;

use std::sync::Arc;

use libroam::{MvispClient, SimulationSpec, UampClient};
use roam_core::error::ProtocolError;
use roam_core::wire::{FeatureSet, SimulationOffer};

fn spec(num_agents: u32) -> SimulationSpec {
    SimulationSpec {
        num_agents,
        time_limit_ms: 2000,
        seed: 1,
    }
}

#[test]
fn uamp_client_fails_against_an_mvisp_server() {
    let offer = SimulationOffer {
        num_agents: 2,
        time_limit_ms: 2000,
    };
    let observer = Arc::new(RecordingObserver::default());
    let (addr, server) = spawn_mvisp_server(offer, observer, FeatureSet::default());

    let err = UampClient::connect(&addr, spec(2), FeatureSet::default()).unwrap_err();
    assert!(matches!(err, ProtocolError::UampClientMvispServer));

    let server_err = server.join().expect("server thread").unwrap_err();
    assert!(matches!(server_err, ProtocolError::UampClientMvispServer));
}

#[test]
fn mvisp_client_fails_against_a_uamp_server() {
    let (addr, server) = spawn_uamp_server(FeatureSet::default(), 1);

    let err = MvispClient::connect(&addr, FeatureSet::default(), |_| {
        Some(vec!["idle".to_string()])
    })
    .unwrap_err();
    assert!(matches!(err, ProtocolError::MvispClientUampServer));

    let server_err = server.join().expect("server thread").unwrap_err();
    assert!(matches!(server_err, ProtocolError::MvispClientUampServer));
}

#[test]
fn flat_client_rejects_a_three_d_server() {
    let three_d = FeatureSet {
        three_d: true,
        appearance: false,
    };
    let (addr, server) = spawn_uamp_server(three_d, 1);

    let err = UampClient::connect(&addr, spec(2), FeatureSet::default()).unwrap_err();
    assert!(matches!(err, ProtocolError::ThreeDClientMismatch));

    // The server sees the rejection byte, or only the torn socket if the
    // client disconnected first. Either way its session fails.
    assert!(server.join().expect("server thread").is_err());
}

#[test]
fn client_without_appearance_rejects_an_appearance_server() {
    let appearance = FeatureSet {
        three_d: false,
        appearance: true,
    };
    let (addr, server) = spawn_uamp_server(appearance, 1);

    let err = UampClient::connect(&addr, spec(2), FeatureSet::default()).unwrap_err();
    assert!(matches!(err, ProtocolError::AddRemoveUnsupported));
    assert!(server.join().expect("server thread").is_err());
}

#[test]
fn client_may_offer_more_features_than_the_server_uses() {
    let (addr, server) = spawn_uamp_server(FeatureSet::default(), 1);

    let everything = FeatureSet {
        three_d: true,
        appearance: true,
    };
    let client = UampClient::connect(&addr, spec(2), everything).unwrap();
    // The session runs on the server's (empty) feature set.
    assert_eq!(client.features(), FeatureSet::default());

    client.terminate().unwrap();
    server.join().expect("server thread").unwrap();
}
