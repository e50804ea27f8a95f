pub mod loopback;

use ahash::HashMap;
use thiserror::Error;

use crate::simulation::network::ControlledLink;
use crate::simulation::routing::snapshot::EdgeStats;

#[derive(Debug, Error)]
#[error("simulator call failed: {0}")]
pub struct AdapterError(pub String);

/// The next signalised junction on a vehicle's route, with the network distance to it.
#[derive(Debug, Clone, PartialEq)]
pub struct NextTls {
    pub light: String,
    pub distance: f64,
}

/// The narrow, synchronous capability set the engine consumes from a traffic
/// simulator. Queries return `Option`/empty collections when an entity is unknown;
/// commands return `Result` so callers can swallow per-step failures and retry.
pub trait SimulatorAdapter {
    /// Advances the simulation by one step.
    fn step(&mut self);
    fn sim_time(&self) -> f64;
    fn step_length(&self) -> f64;

    fn vehicle_ids(&self) -> Vec<String>;
    fn vehicle_type(&self, vehicle: &str) -> Option<String>;
    fn vehicle_position(&self, vehicle: &str) -> Option<(f64, f64)>;
    fn vehicle_speed(&self, vehicle: &str) -> Option<f64>;
    fn vehicle_edge(&self, vehicle: &str) -> Option<String>;
    fn vehicle_lane(&self, vehicle: &str) -> Option<String>;
    fn next_traffic_light(&self, vehicle: &str) -> Option<NextTls>;

    fn traffic_light_ids(&self) -> Vec<String>;
    fn junction_position(&self, light: &str) -> Option<(f64, f64)>;
    fn controlled_links(&self, light: &str) -> Vec<ControlledLink>;
    fn state_string(&self, light: &str) -> Option<String>;
    fn set_state_string(&mut self, light: &str, state: &str) -> Result<(), AdapterError>;
    fn phase_index(&self, light: &str) -> Option<usize>;
    fn next_switch_time(&self, light: &str) -> Option<f64>;
    fn set_phase_duration(&mut self, light: &str, seconds: f64) -> Result<(), AdapterError>;
    fn program_id(&self, light: &str) -> Option<String>;
    fn set_program(&mut self, light: &str, program: &str) -> Result<(), AdapterError>;

    fn lane_vehicle_count(&self, lane: &str) -> f64;
    /// Live `(vehicle_count, mean_speed)` samples for the requested edges.
    fn edge_stats(&self, edges: &[String]) -> HashMap<String, EdgeStats>;

    fn add_route(&mut self, route: &str, edges: &[String]) -> Result<(), AdapterError>;
    fn add_vehicle(
        &mut self,
        vehicle: &str,
        route: &str,
        vehicle_type: &str,
    ) -> Result<(), AdapterError>;
    fn set_route(&mut self, vehicle: &str, edges: &[String]) -> Result<(), AdapterError>;
}
