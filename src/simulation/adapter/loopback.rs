use std::sync::Arc;

use ahash::HashMap;

use crate::simulation::adapter::{AdapterError, NextTls, SimulatorAdapter};
use crate::simulation::network::{edge_of_lane, ControlledLink, Network, TlsPhase};
use crate::simulation::routing::snapshot::EdgeStats;

/// Deterministic, queueless in-process simulator backing the adapter contract.
///
/// Vehicles advance along their route edges at free-flow speed and wait at red
/// lights; lights run the programs loaded from the topology. There is no
/// car-following model. It exists so the engine can be driven end to end in tests
/// and demo runs without an external simulator process.
pub struct LoopbackSimulation {
    network: Arc<Network>,
    time: f64,
    step_length: f64,
    lights: Vec<LightState>,
    light_idx: HashMap<String, usize>,
    routes: HashMap<String, Vec<usize>>,
    vehicles: Vec<SimVehicle>,
    spawned: usize,
}

struct LightState {
    id: String,
    phases: Vec<TlsPhase>,
    controlled_links: Vec<ControlledLink>,
    current_program: String,
    phase_index: usize,
    next_switch: f64,
    override_state: Option<String>,
    override_until: f64,
}

impl LightState {
    fn display_state(&self) -> &str {
        match &self.override_state {
            Some(state) => state,
            None => &self.phases[self.phase_index].state,
        }
    }

    fn advance(&mut self, now: f64) {
        if self.override_state.is_some() {
            if now >= self.override_until {
                // override expired, resume the program from the current phase
                self.override_state = None;
                self.next_switch = now + self.phases[self.phase_index].duration;
            }
            return;
        }
        while now >= self.next_switch {
            self.phase_index = (self.phase_index + 1) % self.phases.len();
            self.next_switch += self.phases[self.phase_index].duration;
        }
    }

    /// Index of the controlled link whose input lane belongs to `edge_id`.
    fn link_for_edge(&self, edge_id: &str) -> Option<usize> {
        let prefix = format!("{edge_id}_");
        self.controlled_links
            .iter()
            .position(|link| link.in_lane.starts_with(&prefix))
    }
}

struct SimVehicle {
    id: String,
    vehicle_type: String,
    route: Vec<usize>,
    route_pos: usize,
    offset: f64,
    speed: f64,
    arrived: bool,
}

impl LoopbackSimulation {
    pub fn new(network: Arc<Network>, step_length: f64) -> Self {
        let mut lights = Vec::new();
        let mut light_idx = HashMap::default();
        for tls in network.traffic_lights() {
            light_idx.insert(tls.id.clone(), lights.len());
            lights.push(LightState {
                id: tls.id.clone(),
                phases: tls.phases.clone(),
                controlled_links: tls.controlled_links.clone(),
                current_program: tls.program_id.clone(),
                phase_index: 0,
                next_switch: tls.phases[0].duration,
                override_state: None,
                override_until: 0.0,
            });
        }
        LoopbackSimulation {
            network,
            time: 0.0,
            step_length,
            lights,
            light_idx,
            routes: HashMap::default(),
            vehicles: Vec::new(),
            spawned: 0,
        }
    }

    /// Vehicles ever added, arrivals included.
    pub fn spawned_count(&self) -> usize {
        self.spawned
    }

    fn light(&self, light: &str) -> Option<&LightState> {
        self.light_idx.get(light).map(|&i| &self.lights[i])
    }

    fn light_mut(&mut self, light: &str) -> Result<&mut LightState, AdapterError> {
        match self.light_idx.get(light) {
            Some(&i) => Ok(&mut self.lights[i]),
            None => Err(AdapterError(format!("unknown traffic light {light}"))),
        }
    }

    fn vehicle(&self, vehicle: &str) -> Option<&SimVehicle> {
        self.vehicles.iter().find(|v| v.id == vehicle)
    }

    /// Whether a vehicle may leave `edge` into the junction at its head. Red blocks,
    /// everything else (green, yellow, no light at all) passes.
    fn may_cross(lights: &[LightState], edge_id: &str) -> bool {
        for light in lights {
            if let Some(index) = light.link_for_edge(edge_id) {
                let state = light.display_state();
                return !matches!(state.chars().nth(index), Some('r') | Some('R'));
            }
        }
        true
    }

    fn advance_vehicles(&mut self) {
        let network = self.network.clone();
        for vehicle in &mut self.vehicles {
            let edge = network.edge(vehicle.route[vehicle.route_pos]);
            let advanced = vehicle.offset + edge.freespeed * self.step_length;

            if advanced < edge.length {
                vehicle.offset = advanced;
                vehicle.speed = edge.freespeed;
                continue;
            }

            if vehicle.route_pos + 1 >= vehicle.route.len() {
                vehicle.arrived = true;
                continue;
            }

            if Self::may_cross(&self.lights, &edge.id) {
                vehicle.route_pos += 1;
                vehicle.offset = 0.0;
                vehicle.speed = edge.freespeed;
            } else {
                vehicle.offset = edge.length;
                vehicle.speed = 0.0;
            }
        }
        self.vehicles.retain(|vehicle| !vehicle.arrived);
    }
}

impl SimulatorAdapter for LoopbackSimulation {
    fn step(&mut self) {
        self.time += self.step_length;
        let now = self.time;
        for light in &mut self.lights {
            light.advance(now);
        }
        self.advance_vehicles();
    }

    fn sim_time(&self) -> f64 {
        self.time
    }

    fn step_length(&self) -> f64 {
        self.step_length
    }

    fn vehicle_ids(&self) -> Vec<String> {
        self.vehicles.iter().map(|v| v.id.clone()).collect()
    }

    fn vehicle_type(&self, vehicle: &str) -> Option<String> {
        self.vehicle(vehicle).map(|v| v.vehicle_type.clone())
    }

    fn vehicle_position(&self, vehicle: &str) -> Option<(f64, f64)> {
        let v = self.vehicle(vehicle)?;
        let edge = self.network.edge(v.route[v.route_pos]);
        let from = self.network.node(edge.from);
        let to = self.network.node(edge.to);
        let fraction = if edge.length > 0.0 {
            (v.offset / edge.length).min(1.0)
        } else {
            1.0
        };
        Some((
            from.x + (to.x - from.x) * fraction,
            from.y + (to.y - from.y) * fraction,
        ))
    }

    fn vehicle_speed(&self, vehicle: &str) -> Option<f64> {
        self.vehicle(vehicle).map(|v| v.speed)
    }

    fn vehicle_edge(&self, vehicle: &str) -> Option<String> {
        self.vehicle(vehicle)
            .map(|v| self.network.edge(v.route[v.route_pos]).id.clone())
    }

    fn vehicle_lane(&self, vehicle: &str) -> Option<String> {
        self.vehicle_edge(vehicle).map(|edge| format!("{edge}_0"))
    }

    fn next_traffic_light(&self, vehicle: &str) -> Option<NextTls> {
        let v = self.vehicle(vehicle)?;
        let mut distance = 0.0;
        for (position, &edge_index) in v.route.iter().enumerate().skip(v.route_pos) {
            let edge = self.network.edge(edge_index);
            distance += if position == v.route_pos {
                edge.length - v.offset
            } else {
                edge.length
            };
            for light in &self.lights {
                if light.link_for_edge(&edge.id).is_some() {
                    return Some(NextTls {
                        light: light.id.clone(),
                        distance,
                    });
                }
            }
        }
        None
    }

    fn traffic_light_ids(&self) -> Vec<String> {
        self.lights.iter().map(|l| l.id.clone()).collect()
    }

    fn junction_position(&self, light: &str) -> Option<(f64, f64)> {
        // light ids usually match their junction, fall back to the head node of a
        // controlled input lane
        let node = self.network.node_index(light).or_else(|| {
            let light = self.light(light)?;
            let in_lane = &light.controlled_links.first()?.in_lane;
            let edge = self.network.edge_index(edge_of_lane(in_lane))?;
            Some(self.network.edge(edge).to)
        })?;
        let node = self.network.node(node);
        Some((node.x, node.y))
    }

    fn controlled_links(&self, light: &str) -> Vec<ControlledLink> {
        self.light(light)
            .map(|l| l.controlled_links.clone())
            .unwrap_or_default()
    }

    fn state_string(&self, light: &str) -> Option<String> {
        self.light(light).map(|l| l.display_state().to_string())
    }

    fn set_state_string(&mut self, light: &str, state: &str) -> Result<(), AdapterError> {
        let light = self.light_mut(light)?;
        if state.chars().count() != light.controlled_links.len() {
            return Err(AdapterError(format!(
                "state {state} does not match {} controlled links",
                light.controlled_links.len()
            )));
        }
        light.override_state = Some(state.to_string());
        light.override_until = f64::INFINITY;
        Ok(())
    }

    fn phase_index(&self, light: &str) -> Option<usize> {
        self.light(light).map(|l| l.phase_index)
    }

    fn next_switch_time(&self, light: &str) -> Option<f64> {
        self.light(light).map(|l| {
            if l.override_state.is_some() {
                l.override_until
            } else {
                l.next_switch
            }
        })
    }

    fn set_phase_duration(&mut self, light: &str, seconds: f64) -> Result<(), AdapterError> {
        let now = self.time;
        let light = self.light_mut(light)?;
        if light.override_state.is_some() {
            light.override_until = now + seconds;
        } else {
            light.next_switch = now + seconds;
        }
        Ok(())
    }

    fn program_id(&self, light: &str) -> Option<String> {
        self.light(light).map(|l| l.current_program.clone())
    }

    fn set_program(&mut self, light: &str, program: &str) -> Result<(), AdapterError> {
        let now = self.time;
        let light = self.light_mut(light)?;
        light.current_program = program.to_string();
        light.override_state = None;
        light.next_switch = now + light.phases[light.phase_index].duration;
        Ok(())
    }

    fn lane_vehicle_count(&self, lane: &str) -> f64 {
        let edge_id = edge_of_lane(lane);
        self.vehicles
            .iter()
            .filter(|v| self.network.edge(v.route[v.route_pos]).id == edge_id)
            .count() as f64
    }

    fn edge_stats(&self, edges: &[String]) -> HashMap<String, EdgeStats> {
        edges
            .iter()
            .filter_map(|edge_id| {
                let index = self.network.edge_index(edge_id)?;
                let speeds: Vec<f64> = self
                    .vehicles
                    .iter()
                    .filter(|v| v.route[v.route_pos] == index)
                    .map(|v| v.speed)
                    .collect();
                let mean_speed = if speeds.is_empty() {
                    self.network.edge(index).freespeed
                } else {
                    speeds.iter().sum::<f64>() / speeds.len() as f64
                };
                Some((
                    edge_id.clone(),
                    EdgeStats {
                        vehicle_count: speeds.len() as f64,
                        mean_speed,
                    },
                ))
            })
            .collect()
    }

    fn add_route(&mut self, route: &str, edges: &[String]) -> Result<(), AdapterError> {
        let indices = edges
            .iter()
            .map(|edge| {
                self.network
                    .edge_index(edge)
                    .ok_or_else(|| AdapterError(format!("unknown edge {edge} in route {route}")))
            })
            .collect::<Result<Vec<usize>, AdapterError>>()?;
        if indices.is_empty() {
            return Err(AdapterError(format!("route {route} has no edges")));
        }
        self.routes.insert(route.to_string(), indices);
        Ok(())
    }

    fn add_vehicle(
        &mut self,
        vehicle: &str,
        route: &str,
        vehicle_type: &str,
    ) -> Result<(), AdapterError> {
        let Some(edges) = self.routes.get(route) else {
            return Err(AdapterError(format!("unknown route {route}")));
        };
        if self.vehicle(vehicle).is_some() {
            return Err(AdapterError(format!("vehicle {vehicle} already exists")));
        }
        let first_edge = self.network.edge(edges[0]);
        self.spawned += 1;
        self.vehicles.push(SimVehicle {
            id: vehicle.to_string(),
            vehicle_type: vehicle_type.to_string(),
            route: edges.clone(),
            route_pos: 0,
            offset: 0.0,
            speed: first_edge.freespeed,
            arrived: false,
        });
        Ok(())
    }

    fn set_route(&mut self, vehicle: &str, edges: &[String]) -> Result<(), AdapterError> {
        let indices = edges
            .iter()
            .map(|edge| {
                self.network
                    .edge_index(edge)
                    .ok_or_else(|| AdapterError(format!("unknown edge {edge}")))
            })
            .collect::<Result<Vec<usize>, AdapterError>>()?;
        if indices.is_empty() {
            return Err(AdapterError("route must not be empty".to_string()));
        }
        let current_edge = self
            .vehicle(vehicle)
            .map(|v| v.route[v.route_pos])
            .ok_or_else(|| AdapterError(format!("unknown vehicle {vehicle}")))?;

        let v = self
            .vehicles
            .iter_mut()
            .find(|v| v.id == vehicle)
            .expect("vehicle checked above");
        // keep the position when the new route starts on the current edge
        if indices[0] != current_edge {
            v.offset = 0.0;
        }
        v.route = indices;
        v.route_pos = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_approx_eq::assert_approx_eq;

    use super::LoopbackSimulation;
    use crate::simulation::adapter::SimulatorAdapter;
    use crate::simulation::test_util::signalised_network;

    fn simulation() -> LoopbackSimulation {
        let network = Arc::new(signalised_network());
        let mut sim = LoopbackSimulation::new(network, 1.0);
        sim.add_route("route", &["in".to_string(), "out".to_string()])
            .unwrap();
        sim.add_vehicle("amb", "route", "ambulance").unwrap();
        sim
    }

    #[test]
    fn vehicle_advances_at_freespeed() {
        let mut sim = simulation();
        sim.step();
        // 10 m/s on a 100 m edge
        assert_eq!(Some("in".to_string()), sim.vehicle_edge("amb"));
        assert_approx_eq!(10.0, sim.vehicle_position("amb").unwrap().0);
        assert_approx_eq!(10.0, sim.vehicle_speed("amb").unwrap());
    }

    #[test]
    fn red_light_blocks_crossing() {
        let mut sim = simulation();
        // the program starts red for the approach (state "r"), drive to the stop line
        for _ in 0..12 {
            sim.step();
        }
        assert_eq!(Some("in".to_string()), sim.vehicle_edge("amb"));
        assert_approx_eq!(0.0, sim.vehicle_speed("amb").unwrap());
    }

    #[test]
    fn green_override_lets_vehicle_pass_and_arrive() {
        let mut sim = simulation();
        sim.set_state_string("J", "G").unwrap();
        sim.set_phase_duration("J", 30.0).unwrap();
        let mut seen_out = false;
        for _ in 0..25 {
            sim.step();
            if sim.vehicle_edge("amb").as_deref() == Some("out") {
                seen_out = true;
            }
        }
        assert!(seen_out, "vehicle must cross on the imposed green");
        // 100 m + 100 m at 10 m/s, the vehicle has arrived and vanished
        assert!(sim.vehicle_ids().is_empty());
    }

    #[test]
    fn next_traffic_light_reports_network_distance() {
        let mut sim = simulation();
        sim.step();
        let next = sim.next_traffic_light("amb").unwrap();
        assert_eq!("J", next.light);
        assert_approx_eq!(90.0, next.distance);
    }

    #[test]
    fn program_cycles_phases() {
        let mut sim = simulation();
        assert_eq!(Some("r".to_string()), sim.state_string("J"));
        // first phase lasts 30 s
        for _ in 0..31 {
            sim.step();
        }
        assert_eq!(Some("G".to_string()), sim.state_string("J"));
        assert_eq!(Some(1), sim.phase_index("J"));
    }

    #[test]
    fn set_program_clears_override() {
        let mut sim = simulation();
        sim.set_state_string("J", "G").unwrap();
        assert_eq!(Some("G".to_string()), sim.state_string("J"));
        sim.set_program("J", "0").unwrap();
        assert_eq!(Some("r".to_string()), sim.state_string("J"));
        assert_eq!(Some("0".to_string()), sim.program_id("J"));
    }

    #[test]
    fn edge_stats_report_counts_and_speeds() {
        let mut sim = simulation();
        sim.step();
        let stats = sim.edge_stats(&["in".to_string(), "out".to_string()]);
        assert_approx_eq!(1.0, stats["in"].vehicle_count);
        assert_approx_eq!(10.0, stats["in"].mean_speed);
        // empty edge falls back to freespeed
        assert_approx_eq!(0.0, stats["out"].vehicle_count);
        assert_approx_eq!(10.0, stats["out"].mean_speed);
        assert_approx_eq!(1.0, sim.lane_vehicle_count("in_0"));
    }

    #[test]
    fn rejects_unknown_entities() {
        let mut sim = simulation();
        assert!(sim.add_route("bad", &["ghost".to_string()]).is_err());
        assert!(sim.add_vehicle("v2", "ghost-route", "car").is_err());
        assert!(sim.set_state_string("ghost", "G").is_err());
        // wrong state length for the single controlled link
        assert!(sim.set_state_string("J", "GG").is_err());
    }
}
