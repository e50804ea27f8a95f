//! Fixture builders shared between unit and integration tests. Only compiled for
//! tests or with the `test_util` feature enabled.

use crate::simulation::network::{ControlledLink, Network, TlsPhase, TrafficLight};
use crate::simulation::routing::dijkstra::Dijkstra;
use crate::simulation::routing::landmarks::LandmarkTables;

/// Directed chain `a -> b -> c` with base times 5 s and 7 s.
pub fn three_node_network() -> Network {
    let mut network = Network::new(Some("three-node-chain".to_string()));
    network.add_node("a", 0.0, 0.0);
    network.add_node("b", 50.0, 0.0);
    network.add_node("c", 120.0, 0.0);
    network.add_edge("ab", "a", "b", 50.0, 10.0).unwrap();
    network.add_edge("bc", "b", "c", 70.0, 10.0).unwrap();
    network
}

/// Two routes from `a` to `d`: fast via `b` (4 s + 4 s), slow via `c` (10 s + 10 s).
pub fn diamond_network() -> Network {
    let mut network = Network::new(Some("diamond".to_string()));
    network.add_node("a", 0.0, 0.0);
    network.add_node("b", 40.0, 40.0);
    network.add_node("c", 40.0, -40.0);
    network.add_node("d", 80.0, 0.0);
    network.add_edge("ab", "a", "b", 40.0, 10.0).unwrap();
    network.add_edge("bd", "b", "d", 40.0, 10.0).unwrap();
    network.add_edge("ac", "a", "c", 100.0, 10.0).unwrap();
    network.add_edge("cd", "c", "d", 100.0, 10.0).unwrap();
    network
}

/// `A -in-> J -out-> B` with a signal at `J` that starts red for the approach:
/// phases `r` (30 s) and `G` (30 s), one controlled link `in_0 -> out_0`.
pub fn signalised_network() -> Network {
    let mut network = Network::new(Some("signalised".to_string()));
    network.add_node("A", 0.0, 0.0);
    network.add_node("J", 100.0, 0.0);
    network.add_node("B", 200.0, 0.0);
    network.add_edge("in", "A", "J", 100.0, 10.0).unwrap();
    network.add_edge("out", "J", "B", 100.0, 10.0).unwrap();
    network.add_traffic_light(TrafficLight {
        id: "J".to_string(),
        program_id: "0".to_string(),
        phases: vec![
            TlsPhase {
                duration: 30.0,
                state: "r".to_string(),
            },
            TlsPhase {
                duration: 30.0,
                state: "G".to_string(),
            },
        ],
        controlled_links: vec![ControlledLink {
            in_lane: "in_0".to_string(),
            out_lane: "out_0".to_string(),
        }],
    });
    network
}

/// Landmark tables computed from the given nodes, bypassing degree selection.
pub fn landmark_tables_for(network: &Network, landmark_ids: &[&str]) -> LandmarkTables {
    let landmarks: Vec<String> = landmark_ids.iter().map(|id| id.to_string()).collect();
    let tables = landmark_ids
        .iter()
        .map(|id| {
            let index = network
                .node_index(id)
                .unwrap_or_else(|| panic!("fixture landmark {id} must exist"));
            Dijkstra::travel_times_from(network, index)
        })
        .collect();
    LandmarkTables::from_parts(landmarks, tables)
}
