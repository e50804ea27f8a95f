use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ahash::HashMap;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::simulation::error::EngineError;
use crate::simulation::network::Network;
use crate::simulation::routing::dijkstra::Dijkstra;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LandmarkMeta {
    pub network: String,
    pub num_nodes: usize,
    pub num_edges: usize,
    pub num_landmarks: usize,
}

/// Precomputed single-source shortest travel times from each landmark, dense by node
/// index of the network they were built for. With the triangle inequality over
/// free-flow weights, `|d(goal) - d(node)|` lower-bounds the true remaining cost.
#[derive(Debug)]
pub struct LandmarkTables {
    meta: LandmarkMeta,
    landmarks: Vec<String>,
    tables: Vec<Vec<f64>>,
}

impl LandmarkTables {
    /// Selects landmarks and runs one Dijkstra per landmark over `base_time` weights.
    ///
    /// Selection is degree based: take the top `3k` nodes by degree, shuffle them with
    /// a seeded rng so runs are reproducible, keep the first `k`. High-degree nodes
    /// tend to lie on many shortest paths, the shuffle avoids clustering within the
    /// band. Farthest-point selection would give tighter bounds, see DESIGN.md.
    pub fn precompute(
        network: &Network,
        num_landmarks: usize,
        seed: u64,
    ) -> Result<Self, EngineError> {
        if network.nodes().is_empty() {
            return Err(EngineError::EmptyNetwork);
        }
        let num_landmarks = num_landmarks.max(1);
        let selected = Self::choose_landmarks(network, num_landmarks, seed);

        let tables: Vec<Vec<f64>> = selected
            .iter()
            .map(|&landmark| {
                info!(
                    "Computing landmark table for {}",
                    network.node(landmark).id
                );
                Dijkstra::travel_times_from(network, landmark)
            })
            .collect();

        Ok(LandmarkTables {
            meta: LandmarkMeta {
                network: network.name.clone().unwrap_or_default(),
                num_nodes: network.nodes().len(),
                num_edges: network.edges().len(),
                num_landmarks: selected.len(),
            },
            landmarks: selected
                .into_iter()
                .map(|i| network.node(i).id.clone())
                .collect(),
            tables,
        })
    }

    fn choose_landmarks(network: &Network, k: usize, seed: u64) -> Vec<usize> {
        let by_degree: Vec<usize> = (0..network.nodes().len())
            .sorted_by_key(|&n| {
                let degree = network.out_edges(n).len() + network.in_neighbors(n).len();
                // sort by descending degree, ties broken by id for reproducibility
                (std::cmp::Reverse(degree), network.node(n).id.clone())
            })
            .collect();

        let band = (k * 3).max(k).min(by_degree.len());
        let mut candidates: Vec<usize> = by_degree[..band].to_vec();
        candidates.shuffle(&mut StdRng::seed_from_u64(seed));
        candidates.truncate(k);

        // pad from the remaining nodes if the band was too small
        for &n in &by_degree[band..] {
            if candidates.len() >= k {
                break;
            }
            candidates.push(n);
        }
        candidates
    }

    /// Tables from explicit parts, used by fixtures and tests that need a particular
    /// landmark choice.
    #[cfg(any(test, feature = "test_util"))]
    pub fn from_parts(landmarks: Vec<String>, tables: Vec<Vec<f64>>) -> Self {
        LandmarkTables {
            meta: LandmarkMeta::default(),
            landmarks,
            tables,
        }
    }

    pub fn meta(&self) -> &LandmarkMeta {
        &self.meta
    }

    pub fn landmarks(&self) -> &[String] {
        &self.landmarks
    }

    pub fn tables(&self) -> &[Vec<f64>] {
        &self.tables
    }

    pub fn to_file(&self, network: &Network, path: &Path) -> Result<(), EngineError> {
        if let Some(prefix) = path.parent() {
            std::fs::create_dir_all(prefix).map_err(|e| EngineError::io(path, e))?;
        }
        let io_tables = IoLandmarkTables::from_tables(self, network);
        let file = File::create(path).map_err(|e| EngineError::io(path, e))?;
        serde_json::to_writer(BufWriter::new(file), &io_tables)
            .map_err(|e| EngineError::parse(path, e))?;
        info!("Wrote landmark tables to {path:?}");
        Ok(())
    }

    /// Loads persisted tables and densifies them against the given network. Missing
    /// destinations mean unreachable. Landmarks the network does not know are skipped.
    pub fn from_file(path: &Path, network: &Network) -> Result<Self, EngineError> {
        let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
        let io_tables: IoLandmarkTables = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| EngineError::parse(path, e))?;

        let mut landmarks = Vec::new();
        let mut tables = Vec::new();
        for landmark_id in &io_tables.landmarks {
            if network.node_index(landmark_id).is_none() {
                warn!("Landmark {landmark_id} is not part of the network, skipping it");
                continue;
            }
            let mut dense = vec![f64::INFINITY; network.nodes().len()];
            if let Some(table) = io_tables.tables.get(landmark_id) {
                for (node_id, &seconds) in table {
                    if let Some(index) = network.node_index(node_id) {
                        dense[index] = seconds;
                    }
                }
            }
            landmarks.push(landmark_id.clone());
            tables.push(dense);
        }
        info!(
            "Loaded {} landmark tables from {path:?}",
            landmarks.len()
        );
        Ok(LandmarkTables {
            meta: io_tables.meta,
            landmarks,
            tables,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct IoLandmarkTables {
    #[serde(default)]
    meta: LandmarkMeta,
    #[serde(default)]
    landmarks: Vec<String>,
    #[serde(default)]
    tables: HashMap<String, HashMap<String, f64>>,
}

impl IoLandmarkTables {
    fn from_tables(tables: &LandmarkTables, network: &Network) -> Self {
        let io_tables = tables
            .landmarks
            .iter()
            .zip(tables.tables.iter())
            .map(|(id, dense)| {
                let table: HashMap<String, f64> = dense
                    .iter()
                    .enumerate()
                    // +inf destinations are omitted, json has no representation for them
                    .filter(|(_, seconds)| seconds.is_finite())
                    .map(|(node, &seconds)| (network.node(node).id.clone(), seconds))
                    .collect();
                (id.clone(), table)
            })
            .collect();
        IoLandmarkTables {
            meta: tables.meta.clone(),
            landmarks: tables.landmarks.clone(),
            tables: io_tables,
        }
    }
}
