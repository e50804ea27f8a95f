pub mod io;

use ahash::HashMap;

/// Minimum average speed for an edge. Keeps `base_time` finite on degenerate input.
pub const MIN_EDGE_SPEED: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: String,
    pub from: usize,
    pub to: usize,
    pub length: f64,
    pub freespeed: f64,
    pub base_time: f64,
}

/// Outgoing adjacency entry, laid out for the router's relaxation loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutEdge {
    pub to: usize,
    pub base_time: f64,
    pub edge: usize,
}

/// One input-to-output lane movement at a signalised junction. Each character of the
/// light's state string controls one of these.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlledLink {
    pub in_lane: String,
    pub out_lane: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TlsPhase {
    pub duration: f64,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrafficLight {
    pub id: String,
    pub program_id: String,
    pub phases: Vec<TlsPhase>,
    pub controlled_links: Vec<ControlledLink>,
}

/// The routing graph. Nodes and edges are stored in dense vectors and addressed by
/// index internally; external string ids only appear at the API boundary. Immutable
/// after load, so it can be shared freely between searches.
#[derive(Debug, Default)]
pub struct Network {
    pub name: Option<String>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    node_idx: HashMap<String, usize>,
    edge_idx: HashMap<String, usize>,
    out_edges: Vec<Vec<OutEdge>>,
    in_neighbors: Vec<Vec<usize>>,
    // parallel edges keep the last seen entry, lane bundles are already aggregated
    endpoints_to_edge: HashMap<(usize, usize), usize>,
    traffic_lights: Vec<TrafficLight>,
    tls_idx: HashMap<String, usize>,
    skipped_records: usize,
}

impl Network {
    pub fn new(name: Option<String>) -> Self {
        Network {
            name,
            ..Default::default()
        }
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::simulation::error::EngineError> {
        io::load_from_xml(path)
    }

    pub fn add_node(&mut self, id: &str, x: f64, y: f64) -> usize {
        if let Some(&index) = self.node_idx.get(id) {
            return index;
        }
        let index = self.nodes.len();
        self.nodes.push(Node {
            id: id.to_string(),
            x,
            y,
        });
        self.node_idx.insert(id.to_string(), index);
        self.out_edges.push(Vec::new());
        self.in_neighbors.push(Vec::new());
        index
    }

    /// Adds an edge between two already registered nodes. Returns `None` when an
    /// endpoint is unknown, such edges are dropped by the loader.
    pub fn add_edge(
        &mut self,
        id: &str,
        from: &str,
        to: &str,
        avg_length: f64,
        avg_speed: f64,
    ) -> Option<usize> {
        let from = *self.node_idx.get(from)?;
        let to = *self.node_idx.get(to)?;

        let freespeed = avg_speed.max(MIN_EDGE_SPEED);
        let base_time = avg_length / freespeed;
        let index = self.edges.len();
        self.edges.push(Edge {
            id: id.to_string(),
            from,
            to,
            length: avg_length,
            freespeed,
            base_time,
        });
        self.edge_idx.insert(id.to_string(), index);
        self.out_edges[from].push(OutEdge {
            to,
            base_time,
            edge: index,
        });
        self.in_neighbors[to].push(from);
        self.endpoints_to_edge.insert((from, to), index);
        Some(index)
    }

    pub fn add_traffic_light(&mut self, light: TrafficLight) {
        self.tls_idx.insert(light.id.clone(), self.traffic_lights.len());
        self.traffic_lights.push(light);
    }

    pub(crate) fn count_skipped(&mut self, n: usize) {
        self.skipped_records += n;
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn edge(&self, index: usize) -> &Edge {
        &self.edges[index]
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.node_idx.get(id).copied()
    }

    pub fn edge_index(&self, id: &str) -> Option<usize> {
        self.edge_idx.get(id).copied()
    }

    pub fn out_edges(&self, node: usize) -> &[OutEdge] {
        &self.out_edges[node]
    }

    pub fn in_neighbors(&self, node: usize) -> &[usize] {
        &self.in_neighbors[node]
    }

    pub fn edge_between(&self, from: usize, to: usize) -> Option<usize> {
        self.endpoints_to_edge.get(&(from, to)).copied()
    }

    pub fn traffic_lights(&self) -> &[TrafficLight] {
        &self.traffic_lights
    }

    pub fn traffic_light(&self, id: &str) -> Option<&TrafficLight> {
        self.tls_idx.get(id).map(|&i| &self.traffic_lights[i])
    }

    pub fn skipped_records(&self) -> usize {
        self.skipped_records
    }

    /// Nearest node to a planar position, used to re-anchor replans at a vehicle's
    /// live position.
    pub fn nearest_node(&self, x: f64, y: f64) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (index, node) in self.nodes.iter().enumerate() {
            let d = (node.x - x) * (node.x - x) + (node.y - y) * (node.y - y);
            if best.is_none_or(|(_, best_d)| d < best_d) {
                best = Some((index, d));
            }
        }
        best.map(|(index, _)| index)
    }

    /// All nodes from which `goal` is reachable, computed over the reverse adjacency.
    /// Includes `goal` itself.
    pub fn nodes_reaching(&self, goal: usize) -> Vec<usize> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![goal];
        let mut result = Vec::new();
        seen[goal] = true;
        while let Some(v) = stack.pop() {
            result.push(v);
            for &u in self.in_neighbors(v) {
                if !seen[u] {
                    seen[u] = true;
                    stack.push(u);
                }
            }
        }
        result
    }

    /// Converts a node path into the corresponding edge id list.
    pub fn edge_path(&self, node_ids: &[String]) -> Vec<String> {
        let mut edges = Vec::new();
        for pair in node_ids.windows(2) {
            let (Some(u), Some(v)) = (self.node_index(&pair[0]), self.node_index(&pair[1])) else {
                continue;
            };
            if let Some(edge) = self.edge_between(u, v) {
                edges.push(self.edge(edge).id.clone());
            }
        }
        edges
    }
}

/// Strips the lane ordinal from a SUMO lane id, e.g. `E4_1 -> E4`.
pub fn edge_of_lane(lane_id: &str) -> &str {
    lane_id
        .rsplit_once('_')
        .map(|(edge, _)| edge)
        .unwrap_or(lane_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::test_util::three_node_network;

    #[test]
    fn adjacency_agrees_in_both_directions() {
        let network = three_node_network();
        for (u, outs) in (0..network.nodes().len()).map(|n| (n, network.out_edges(n))) {
            for out in outs {
                let count = network
                    .in_neighbors(out.to)
                    .iter()
                    .filter(|&&n| n == u)
                    .count();
                assert_eq!(1, count, "u must appear in in({}) exactly once", out.to);
            }
        }
    }

    #[test]
    fn base_time_is_length_over_floored_speed() {
        let mut network = Network::new(None);
        network.add_node("a", 0., 0.);
        network.add_node("b", 10., 0.);
        let edge = network.add_edge("a->b", "a", "b", 10.0, 0.0).unwrap();

        assert_eq!(MIN_EDGE_SPEED, network.edge(edge).freespeed);
        assert_eq!(10.0 / MIN_EDGE_SPEED, network.edge(edge).base_time);
        assert!(network.edge(edge).base_time >= 0.0);
    }

    #[test]
    fn edge_with_unknown_endpoint_is_dropped() {
        let mut network = Network::new(None);
        network.add_node("a", 0., 0.);
        assert!(network.add_edge("a->ghost", "a", "ghost", 10.0, 10.0).is_none());
        assert_eq!(0, network.edges().len());
    }

    #[test]
    fn parallel_edges_keep_last_in_reverse_map() {
        let mut network = Network::new(None);
        let a = network.add_node("a", 0., 0.);
        let b = network.add_node("b", 100., 0.);
        network.add_edge("first", "a", "b", 100.0, 10.0).unwrap();
        let second = network.add_edge("second", "a", "b", 100.0, 5.0).unwrap();

        // both edges stay routable, the reverse map keeps the last seen one
        assert_eq!(2, network.out_edges(a).len());
        assert_eq!(Some(second), network.edge_between(a, b));
    }

    #[test]
    fn nearest_node_picks_closest() {
        let network = three_node_network();
        let nearest = network.nearest_node(51.0, 1.0).unwrap();
        assert_eq!("b", network.node(nearest).id);
    }

    #[test]
    fn nodes_reaching_goal() {
        let network = three_node_network();
        let goal = network.node_index("c").unwrap();
        let mut reaching: Vec<_> = network
            .nodes_reaching(goal)
            .into_iter()
            .map(|n| network.node(n).id.clone())
            .collect();
        reaching.sort();
        assert_eq!(vec!["a", "b", "c"], reaching);

        // nothing reaches "a" except itself
        let start = network.node_index("a").unwrap();
        assert_eq!(vec![start], network.nodes_reaching(start));
    }

    #[test]
    fn lane_id_maps_to_edge() {
        assert_eq!("E4", edge_of_lane("E4_1"));
        assert_eq!("edge#2", edge_of_lane("edge#2_0"));
        assert_eq!("plain", edge_of_lane("plain"));
    }
}
