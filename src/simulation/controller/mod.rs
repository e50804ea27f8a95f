use std::sync::Arc;

use derive_builder::Builder;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::simulation::adapter::SimulatorAdapter;
use crate::simulation::config::SimpleConfig;
use crate::simulation::network::Network;
use crate::simulation::preemption::PreemptionController;
use crate::simulation::routing::astar::{IncrementalSearch, Route, Router, SearchStatus};
use crate::simulation::routing::snapshot::{collect_local_edges, EdgeStatsSnapshot};
use crate::simulation::scenario::Scenario;

/// Spawn periods below this would flood the network faster than routes resolve.
const MIN_SPAWN_PERIOD: f64 = 5.0;

/// The host loop: advances the simulator, maintains preemptions, drives the
/// cooperative router, evaluates triggers and spawns ambulances. Single threaded,
/// everything happens between two simulator steps.
#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct RunController<A: SimulatorAdapter> {
    adapter: A,
    network: Arc<Network>,
    router: Router,
    preemption: PreemptionController,
    goal: String,
    #[builder(default)]
    start: Option<String>,
    #[builder(default = "10.0")]
    replan_interval: f64,
    #[builder(default = "50")]
    max_expansions: usize,
    #[builder(default = "2")]
    snapshot_depth: usize,
    #[builder(default = "200")]
    snapshot_max_edges: usize,
    #[builder(default = "60.0")]
    spawn_period: f64,
    #[builder(default)]
    max_sim_time: Option<f64>,
    #[builder(default = "42")]
    seed: u64,
}

/// Search in flight for one ambulance, see `RunController::drive_replan`.
struct InFlight {
    search: IncrementalSearch,
    ambulance: String,
}

impl<A: SimulatorAdapter> RunController<A> {
    pub fn from_scenario(adapter: A, scenario: &Scenario) -> Self {
        let config: &SimpleConfig = &scenario.config;
        // the signal-delay oracle stays at zero here, the preemption controller keeps
        // the lights green along the approach anyway
        let router = Router::new(scenario.network.clone(), scenario.landmarks.clone());
        let preemption = PreemptionController::new(
            scenario.fuzzy_model.clone(),
            config.modules.preemption.keep_green_seconds,
        );

        RunControllerBuilder::default()
            .adapter(adapter)
            .network(scenario.network.clone())
            .router(router)
            .preemption(preemption)
            .goal(
                config
                    .modules
                    .run
                    .goal_node
                    .clone()
                    .unwrap_or_default(),
            )
            .start(config.modules.run.start_node.clone())
            .replan_interval(config.modules.routing.replan_interval)
            .max_expansions(config.modules.routing.max_expansions)
            .snapshot_depth(config.modules.routing.snapshot_depth)
            .snapshot_max_edges(config.modules.routing.snapshot_max_edges)
            .spawn_period(config.modules.run.spawn_period)
            .max_sim_time(config.modules.run.max_sim_time)
            .seed(config.modules.run.seed)
            .build()
            .expect("all mandatory controller fields are set")
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn set_goal(&mut self, goal: String) {
        self.goal = goal;
    }

    pub fn preemption(&self) -> &PreemptionController {
        &self.preemption
    }

    /// Runs the loop until `max_sim_time` (or forever without one). Exits early when
    /// the goal node is unknown.
    pub fn run(&mut self) {
        let goal = self.resolve_goal();
        let Some(goal) = goal else {
            warn!("Goal node {:?} is not part of the network", self.goal);
            return;
        };
        info!("Starting run loop towards {goal}");

        let spawn_period = self.spawn_period.max(MIN_SPAWN_PERIOD);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut spawn_seq = 0usize;
        let mut last_spawn_time = 0.0;
        let mut last_replan_time = -1.0;
        let mut in_flight: Option<InFlight> = None;

        // first ambulance right away so the run shows traffic from the start
        self.spawn_ambulance(&goal, &mut rng, &mut spawn_seq);

        loop {
            self.adapter.step();
            let now = self.adapter.sim_time();
            if self.max_sim_time.is_some_and(|limit| now >= limit) {
                break;
            }

            self.preemption.maintain(&mut self.adapter);

            if last_replan_time < 0.0 {
                last_replan_time = now;
            }
            if let Some(flight) = in_flight.take() {
                in_flight = self.drive_replan(flight);
            } else if now - last_replan_time >= self.replan_interval && now > 0.0 {
                last_replan_time = now;
                in_flight = self.begin_replan(&goal);
            }

            for ambulance in self.ambulances() {
                self.preemption.evaluate(&mut self.adapter, &ambulance);
            }

            if now - last_spawn_time >= spawn_period && now > 0.0 {
                last_spawn_time = now;
                self.spawn_ambulance(&goal, &mut rng, &mut spawn_seq);
            }
        }
        info!("Run loop finished at t={:.1}", self.adapter.sim_time());
    }

    fn resolve_goal(&self) -> Option<String> {
        if self.network.node_index(&self.goal).is_some() {
            return Some(self.goal.clone());
        }
        None
    }

    fn ambulances(&self) -> Vec<String> {
        self.adapter
            .vehicle_ids()
            .into_iter()
            .filter(|vehicle| {
                self.adapter
                    .vehicle_type(vehicle)
                    .map(|t| {
                        let t = t.to_lowercase();
                        t.contains("ambulance") || t.contains("emergency")
                    })
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Starts an incremental replan for the oldest live ambulance, anchored at the
    /// node nearest to its current position, with live metrics for the local
    /// neighbourhood only.
    fn begin_replan(&mut self, goal: &str) -> Option<InFlight> {
        let ambulance = self.ambulances().into_iter().next()?;

        let start_node = self
            .adapter
            .vehicle_position(&ambulance)
            .and_then(|(x, y)| self.network.nearest_node(x, y))
            .map(|index| self.network.node(index).id.clone())
            .or_else(|| self.start.clone())?;

        let start_index = self.network.node_index(&start_node)?;
        let local_edges = collect_local_edges(
            &self.network,
            start_index,
            self.snapshot_depth,
            self.snapshot_max_edges,
        );
        let stats = self.adapter.edge_stats(&local_edges);
        let snapshot = EdgeStatsSnapshot::from_stats(&self.network, &stats);

        let search = self.router.begin_incremental(&start_node, goal, snapshot);
        Some(InFlight { search, ambulance })
    }

    /// Advances the in-flight search by one bounded slice. On completion the fresh
    /// route is pushed to the ambulance, an unreachable result leaves the previous
    /// route standing until the next replan retries.
    fn drive_replan(&mut self, mut flight: InFlight) -> Option<InFlight> {
        match flight.search.step(self.max_expansions) {
            SearchStatus::Running => Some(flight),
            SearchStatus::Done(route) => {
                self.apply_route(&flight.ambulance, &route);
                None
            }
            SearchStatus::Unreachable => {
                warn!(
                    "Replan for {} found no route, keeping the previous one",
                    flight.ambulance
                );
                None
            }
        }
    }

    fn apply_route(&mut self, ambulance: &str, route: &Route) {
        let mut edges = self.network.edge_path(&route.nodes);
        if edges.is_empty() {
            return;
        }
        // the planned path starts at the snapped node ahead of the vehicle, keep the
        // edge it is currently on so the route stays continuous
        if let Some(current_edge) = self.adapter.vehicle_edge(ambulance) {
            if edges.first() != Some(&current_edge) {
                let leads_into_path = self
                    .network
                    .edge_index(&current_edge)
                    .map(|index| self.network.edge(index).to)
                    .and_then(|head| route.nodes.first().map(|first| (head, first)))
                    .is_some_and(|(head, first)| self.network.node(head).id == *first);
                if leads_into_path {
                    edges.insert(0, current_edge);
                }
            }
        }
        match self.adapter.set_route(ambulance, &edges) {
            Ok(()) => info!(
                "Replan for {ambulance}: eta {:.1}s over {} nodes",
                route.travel_time,
                route.nodes.len()
            ),
            Err(e) => warn!("Could not apply route for {ambulance}: {e}"),
        }
    }

    /// Spawns an ambulance at a random node that can reach the goal and routes it
    /// there with a blocking cold-start plan.
    fn spawn_ambulance(&mut self, goal: &str, rng: &mut StdRng, spawn_seq: &mut usize) {
        let Some(goal_index) = self.network.node_index(goal) else {
            return;
        };
        let candidates: Vec<usize> = self
            .network
            .nodes_reaching(goal_index)
            .into_iter()
            .filter(|&n| n != goal_index)
            .collect();
        let Some(&start) = candidates.choose(rng) else {
            warn!("No spawn candidates can reach {goal}");
            return;
        };
        let start_id = self.network.node(start).id.clone();

        let Some(route) = self.router.plan(&start_id, goal) else {
            return;
        };
        let edges = self.network.edge_path(&route.nodes);
        if edges.is_empty() {
            return;
        }

        let route_id = format!("amb_route_{spawn_seq}");
        let vehicle_id = format!("ambulance_{spawn_seq}");
        *spawn_seq += 1;
        if let Err(e) = self.adapter.add_route(&route_id, &edges) {
            warn!("Could not add route {route_id}: {e}");
            return;
        }
        match self.adapter.add_vehicle(&vehicle_id, &route_id, "ambulance") {
            Ok(()) => info!(
                "Spawned {vehicle_id}: {start_id} -> {goal} over {} edges",
                edges.len()
            ),
            Err(e) => warn!("Could not spawn {vehicle_id}: {e}"),
        }
    }
}
