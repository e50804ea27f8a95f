pub mod fuzzy;

use ahash::HashMap;
use tracing::{debug, info};

use crate::simulation::adapter::SimulatorAdapter;
use crate::simulation::network::{edge_of_lane, ControlledLink};
use crate::simulation::preemption::fuzzy::{Features, FuzzyModel};

/// Vehicle length plus gap used to turn a vehicle count into a queue length estimate.
const METERS_PER_QUEUED_VEHICLE: f64 = 7.5;

/// Assumed distance when a candidate light was found by lane matching instead of the
/// simulator's route lookahead.
const FALLBACK_CANDIDATE_DISTANCE: f64 = 150.0;

/// An ACTIVE preemption: which ambulance is served and which state string is imposed.
/// The program to restore on release is kept separately in `normal_programs`, a light
/// with an unknown program is preempted without a restore target.
#[derive(Debug, Clone, PartialEq)]
pub struct PreemptionRecord {
    pub ambulance: String,
    pub state: String,
}

/// Per-light preemption state machine. A light is ACTIVE exactly while it has a
/// record here, INACTIVE otherwise.
pub struct PreemptionController {
    model: FuzzyModel,
    keep_green_seconds: f64,
    normal_programs: HashMap<String, String>,
    active: HashMap<String, PreemptionRecord>,
}

impl PreemptionController {
    pub fn new(model: FuzzyModel, keep_green_seconds: f64) -> Self {
        PreemptionController {
            model,
            keep_green_seconds,
            normal_programs: HashMap::default(),
            active: HashMap::default(),
        }
    }

    pub fn model(&self) -> &FuzzyModel {
        &self.model
    }

    pub fn active_record(&self, light: &str) -> Option<&PreemptionRecord> {
        self.active.get(light)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// The light the ambulance is about to cross: the simulator's route lookahead if
    /// it reports one, otherwise the first light controlling a lane of the current
    /// approach edge.
    pub fn candidate_light<A: SimulatorAdapter>(
        &self,
        adapter: &A,
        vehicle: &str,
        approach_edge: &str,
    ) -> Option<(String, f64)> {
        if let Some(next) = adapter.next_traffic_light(vehicle) {
            return Some((next.light, next.distance));
        }
        if approach_edge.is_empty() {
            return None;
        }
        let lane_prefix = format!("{approach_edge}_");
        for light in adapter.traffic_light_ids() {
            let serves_approach = adapter
                .controlled_links(&light)
                .iter()
                .any(|link| link.in_lane.starts_with(&lane_prefix));
            if serves_approach {
                return Some((light, FALLBACK_CANDIDATE_DISTANCE));
            }
        }
        None
    }

    /// Extracts the crisp features for one (ambulance, light) pair.
    pub fn extract_features<A: SimulatorAdapter>(
        &self,
        adapter: &A,
        vehicle: &str,
        light: &str,
        approach_edge: &str,
        distance_hint: Option<f64>,
    ) -> Features {
        let dist_to_tls = distance_hint
            .or_else(|| {
                adapter
                    .next_traffic_light(vehicle)
                    .filter(|next| next.light == light)
                    .map(|next| next.distance)
            })
            .or_else(|| planar_distance(adapter, vehicle, light))
            .unwrap_or(f64::INFINITY);

        let ambulance_speed = adapter.vehicle_speed(vehicle).unwrap_or(0.0);
        let queue_length = self.queue_length(adapter, vehicle, light, approach_edge);

        let now = adapter.sim_time();
        let phase_remaining = adapter
            .next_switch_time(light)
            .map(|switch| (switch - now).max(0.0))
            .unwrap_or(0.0);

        Features {
            dist_to_tls,
            ambulance_speed,
            queue_length,
            eta_seconds: dist_to_tls / ambulance_speed.max(0.5),
            phase_index: adapter.phase_index(light).unwrap_or(0) as f64,
            phase_remaining,
        }
    }

    fn queue_length<A: SimulatorAdapter>(
        &self,
        adapter: &A,
        vehicle: &str,
        light: &str,
        approach_edge: &str,
    ) -> f64 {
        let ambulance_lane = adapter.vehicle_lane(vehicle);
        let lane_prefix = format!("{approach_edge}_");
        let mut queue = 0.0;
        for link in adapter.controlled_links(light) {
            let on_approach = !approach_edge.is_empty() && link.in_lane.starts_with(&lane_prefix);
            let own_lane = ambulance_lane.as_deref() == Some(link.in_lane.as_str());
            if on_approach || own_lane {
                queue += adapter.lane_vehicle_count(&link.in_lane) * METERS_PER_QUEUED_VEHICLE;
            }
        }
        queue
    }

    /// The ACTIVE transition test: fuzzy probability above the threshold, or the
    /// unconditional near-distance override.
    pub fn should_trigger(&self, features: &Features) -> bool {
        let p = self.model.trigger_probability(features);
        p > self.model.params.trigger_threshold
            || features.dist_to_tls <= self.model.params.near_force_distance_m
    }

    /// Builds the state string favouring the ambulance's approach: `G` for every
    /// controlled link serving it, `r` for everything else.
    pub fn synthesize_state(
        links: &[ControlledLink],
        ambulance_lane: Option<&str>,
        approach_edge: &str,
    ) -> String {
        let lane_prefix = format!("{approach_edge}_");
        let approach_stem = approach_edge.split('#').next().unwrap_or(approach_edge);
        links
            .iter()
            .map(|link| {
                let own_lane = ambulance_lane == Some(link.in_lane.as_str());
                let on_approach =
                    !approach_edge.is_empty() && link.in_lane.starts_with(&lane_prefix);
                let shared_stem = !approach_edge.is_empty()
                    && edge_of_lane(&link.in_lane)
                        .split('#')
                        .next()
                        .is_some_and(|stem| stem == approach_stem);
                if own_lane || on_approach || shared_stem {
                    'G'
                } else {
                    'r'
                }
            })
            .map(|ch| if "GgYyRr".contains(ch) { ch } else { 'r' })
            .collect()
    }

    /// Applies (or refreshes) a preemption on `light` for `vehicle`. Captures the
    /// original program before the first overwrite. Best effort: a failed simulator
    /// call leaves the machine unchanged and returns false.
    pub fn apply_priority<A: SimulatorAdapter>(
        &mut self,
        adapter: &mut A,
        light: &str,
        approach_edge: &str,
        vehicle: &str,
        features: &Features,
    ) -> bool {
        if !self.normal_programs.contains_key(light) {
            if let Some(program) = adapter.program_id(light) {
                self.normal_programs.insert(light.to_string(), program);
            }
        }

        let links = adapter.controlled_links(light);
        if links.is_empty() {
            return false;
        }
        let ambulance_lane = adapter.vehicle_lane(vehicle);
        let state = Self::synthesize_state(&links, ambulance_lane.as_deref(), approach_edge);
        let green_seconds = self.model.extend_seconds(features);

        if adapter.set_state_string(light, &state).is_err() {
            return false;
        }
        // a failed duration request leaves the state standing, maintenance refreshes it
        let _ = adapter.set_phase_duration(light, green_seconds);

        let previous = self.active.insert(
            light.to_string(),
            PreemptionRecord {
                ambulance: vehicle.to_string(),
                state: state.clone(),
            },
        );
        if previous.as_ref().map(|record| record.state.as_str()) != Some(state.as_str()) {
            info!(
                "Preemption on {light} for {vehicle}: state={state} green={green_seconds:.1}s"
            );
        }
        true
    }

    /// Full trigger evaluation for one ambulance: candidate light, features, fuzzy
    /// decision, application. Lights already serving another ambulance are skipped,
    /// so no light is ever ACTIVE for two vehicles at once.
    pub fn evaluate<A: SimulatorAdapter>(&mut self, adapter: &mut A, vehicle: &str) {
        let Some(approach_edge) = adapter.vehicle_edge(vehicle) else {
            return;
        };
        let Some((light, distance)) = self.candidate_light(adapter, vehicle, &approach_edge)
        else {
            return;
        };
        if self
            .active
            .get(&light)
            .is_some_and(|record| record.ambulance != vehicle)
        {
            return;
        }

        let features =
            self.extract_features(adapter, vehicle, &light, &approach_edge, Some(distance));
        if self.should_trigger(&features) {
            self.apply_priority(adapter, &light, &approach_edge, vehicle, &features);
        }
    }

    /// Per-step maintenance of every ACTIVE light: re-assert the imposed state while
    /// the ambulance is still approaching, release once it vanished or passed.
    pub fn maintain<A: SimulatorAdapter>(&mut self, adapter: &mut A) {
        let release_distance = self.model.params.release_distance_m;
        let mut to_release = Vec::new();

        for (light, record) in &self.active {
            if adapter.vehicle_position(&record.ambulance).is_none() {
                to_release.push(light.clone());
                continue;
            }

            let is_upcoming = adapter
                .next_traffic_light(&record.ambulance)
                .is_some_and(|next| next.light == *light);
            let distance =
                planar_distance(adapter, &record.ambulance, light).unwrap_or(f64::INFINITY);

            if is_upcoming || distance <= release_distance {
                // refresh so the simulator's own phase timer does not revert the state
                let _ = adapter.set_state_string(light, &record.state);
                let _ = adapter.set_phase_duration(light, self.keep_green_seconds);
            } else {
                to_release.push(light.clone());
            }
        }

        for light in to_release {
            self.release(adapter, &light);
        }
    }

    fn release<A: SimulatorAdapter>(&mut self, adapter: &mut A, light: &str) {
        if let Some(program) = self.normal_programs.get(light) {
            if adapter.set_program(light, program).is_err() {
                debug!("Could not restore program {program} on {light}");
            }
        }
        self.active.remove(light);
        info!("Preemption released on {light}");
    }
}

fn planar_distance<A: SimulatorAdapter>(
    adapter: &A,
    vehicle: &str,
    light: &str,
) -> Option<f64> {
    let (vx, vy) = adapter.vehicle_position(vehicle)?;
    let (jx, jy) = adapter.junction_position(light)?;
    Some(((vx - jx).powi(2) + (vy - jy).powi(2)).sqrt())
}
