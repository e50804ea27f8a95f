use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::simulation::error::EngineError;
use crate::simulation::io::read_xml;
use crate::simulation::network::{ControlledLink, Network, TlsPhase, TrafficLight};

pub fn load_from_xml(path: &Path) -> Result<Network, EngineError> {
    let io_net: IoNetwork = read_xml(path)?;
    info!(
        "IoNetwork: finished reading topology. It contains {} junctions and {} edges.",
        io_net.junctions.len(),
        io_net.edges.len()
    );

    let network = Network::from(io_net);
    if network.nodes().is_empty() {
        return Err(EngineError::EmptyNetwork);
    }
    if network.skipped_records() > 0 {
        warn!(
            "Skipped {} malformed records while loading {path:?}",
            network.skipped_records()
        );
    }
    info!(
        "Network has {} nodes, {} edges and {} traffic lights.",
        network.nodes().len(),
        network.edges().len(),
        network.traffic_lights().len()
    );
    Ok(network)
}

impl From<IoNetwork> for Network {
    fn from(io_net: IoNetwork) -> Self {
        let mut network = Network::new(None);
        let mut skipped = 0;

        for junction in &io_net.junctions {
            if junction.junction_type.as_deref() == Some("internal") {
                continue;
            }
            let Some(id) = &junction.id else {
                skipped += 1;
                continue;
            };
            network.add_node(id, junction.x, junction.y);
        }

        for edge in &io_net.edges {
            if matches!(edge.function.as_deref(), Some("internal") | Some("connector")) {
                continue;
            }
            let (Some(id), Some(from), Some(to)) = (&edge.id, &edge.from, &edge.to) else {
                skipped += 1;
                continue;
            };
            if edge.lanes.is_empty() {
                skipped += 1;
                continue;
            }
            let avg_length = edge.lanes.iter().map(|l| l.length).sum::<f64>()
                / edge.lanes.len() as f64;
            let avg_speed =
                edge.lanes.iter().map(|l| l.speed).sum::<f64>() / edge.lanes.len() as f64;
            // unknown endpoints: dropped without counting
            network.add_edge(id, from, to, avg_length, avg_speed);
        }

        skipped += convert_traffic_lights(&io_net, &mut network);

        network.count_skipped(skipped);
        network
    }
}

/// Builds traffic light definitions from `tlLogic` programs and the `connection`
/// elements referencing them. The controlled-link count is whatever the topology
/// declares; programs whose phase state strings disagree with it are rejected here
/// rather than patched up later.
fn convert_traffic_lights(io_net: &IoNetwork, network: &mut Network) -> usize {
    let mut skipped = 0;

    for logic in &io_net.tl_logics {
        let Some(id) = &logic.id else {
            skipped += 1;
            continue;
        };

        let mut links: Vec<(usize, ControlledLink)> = Vec::new();
        for connection in &io_net.connections {
            if connection.tl.as_deref() != Some(id.as_str()) {
                continue;
            }
            let (Some(index), Some(from), Some(to)) =
                (connection.link_index, &connection.from, &connection.to)
            else {
                skipped += 1;
                continue;
            };
            links.push((
                index,
                ControlledLink {
                    in_lane: format!("{}_{}", from, connection.from_lane),
                    out_lane: format!("{}_{}", to, connection.to_lane),
                },
            ));
        }
        if links.is_empty() {
            skipped += 1;
            continue;
        }
        links.sort_by_key(|(index, _)| *index);
        let controlled_links: Vec<ControlledLink> =
            links.into_iter().map(|(_, link)| link).collect();

        let phases: Vec<TlsPhase> = logic
            .phases
            .iter()
            .filter_map(|p| {
                p.state.as_ref().map(|state| TlsPhase {
                    duration: p.duration,
                    state: state.clone(),
                })
            })
            .collect();
        if phases.is_empty()
            || phases
                .iter()
                .any(|p| p.state.chars().count() != controlled_links.len())
        {
            warn!(
                "Rejecting traffic light program {id}/{}: phase state length does not match {} controlled links",
                logic.program_id,
                controlled_links.len()
            );
            skipped += 1;
            continue;
        }

        network.add_traffic_light(TrafficLight {
            id: id.clone(),
            program_id: logic.program_id.clone(),
            phases,
            controlled_links,
        });
    }
    skipped
}

fn default_lane_speed() -> f64 {
    // ~50 km/h, the usual urban speed limit
    13.9
}

fn default_program_id() -> String {
    "0".to_string()
}

#[derive(Debug, Deserialize)]
struct IoJunction {
    #[serde(rename = "@id")]
    id: Option<String>,
    #[serde(rename = "@type")]
    junction_type: Option<String>,
    #[serde(rename = "@x", default)]
    x: f64,
    #[serde(rename = "@y", default)]
    y: f64,
}

#[derive(Debug, Deserialize)]
struct IoLane {
    #[serde(rename = "@length", default)]
    length: f64,
    #[serde(rename = "@speed", default = "default_lane_speed")]
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct IoEdge {
    #[serde(rename = "@id")]
    id: Option<String>,
    #[serde(rename = "@from")]
    from: Option<String>,
    #[serde(rename = "@to")]
    to: Option<String>,
    #[serde(rename = "@function")]
    function: Option<String>,
    #[serde(rename = "lane", default)]
    lanes: Vec<IoLane>,
}

#[derive(Debug, Deserialize)]
struct IoPhase {
    #[serde(rename = "@duration", default)]
    duration: f64,
    #[serde(rename = "@state")]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IoTlLogic {
    #[serde(rename = "@id")]
    id: Option<String>,
    #[serde(rename = "@programID", default = "default_program_id")]
    program_id: String,
    #[serde(rename = "phase", default)]
    phases: Vec<IoPhase>,
}

#[derive(Debug, Deserialize)]
struct IoConnection {
    #[serde(rename = "@from")]
    from: Option<String>,
    #[serde(rename = "@to")]
    to: Option<String>,
    #[serde(rename = "@fromLane", default)]
    from_lane: u32,
    #[serde(rename = "@toLane", default)]
    to_lane: u32,
    #[serde(rename = "@tl")]
    tl: Option<String>,
    #[serde(rename = "@linkIndex")]
    link_index: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "net")]
struct IoNetwork {
    #[serde(rename = "junction", default)]
    junctions: Vec<IoJunction>,
    #[serde(rename = "edge", default)]
    edges: Vec<IoEdge>,
    #[serde(rename = "tlLogic", default)]
    tl_logics: Vec<IoTlLogic>,
    #[serde(rename = "connection", default)]
    connections: Vec<IoConnection>,
}
