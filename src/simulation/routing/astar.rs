use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::simulation::network::Network;
use crate::simulation::routing::heuristic::AltHeuristic;
use crate::simulation::routing::landmarks::LandmarkTables;
use crate::simulation::routing::snapshot::{
    EdgeStatsSnapshot, LiveFactor, NoSignalDelay, SignalDelay, UniformFactor,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub travel_time: f64,
    pub nodes: Vec<String>,
}

/// Result of one cooperative `step` call.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchStatus {
    Running,
    Done(Route),
    Unreachable,
}

/// A\* router over the immutable network, with landmark lower bounds and pluggable
/// live-factor and signal-delay oracles.
pub struct Router {
    network: Arc<Network>,
    heuristic: AltHeuristic,
    signal_delay: Arc<dyn SignalDelay>,
}

impl Router {
    pub fn new(network: Arc<Network>, tables: Arc<LandmarkTables>) -> Self {
        Router {
            network,
            heuristic: AltHeuristic::new(tables),
            signal_delay: Arc::new(NoSignalDelay),
        }
    }

    pub fn set_heuristic(&mut self, heuristic: AltHeuristic) {
        self.heuristic = heuristic;
    }

    pub fn set_signal_delay(&mut self, signal_delay: Arc<dyn SignalDelay>) {
        self.signal_delay = signal_delay;
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    /// Blocking search under free-flow conditions, for offline and cold-start use.
    /// `None` means the goal is not reachable from the start.
    pub fn plan(&self, start: &str, goal: &str) -> Option<Route> {
        self.plan_with(start, goal, Box::new(UniformFactor))
    }

    /// Blocking search with an explicit live-factor oracle.
    pub fn plan_with(&self, start: &str, goal: &str, live: Box<dyn LiveFactor>) -> Option<Route> {
        let mut search = self.begin_with(start, goal, live);
        match search.step(usize::MAX) {
            SearchStatus::Done(route) => Some(route),
            _ => None,
        }
    }

    /// Starts a cooperative search. The snapshot is captured here and not re-read, so
    /// every subsequent `step` sees a consistent cost landscape.
    pub fn begin_incremental(
        &self,
        start: &str,
        goal: &str,
        snapshot: EdgeStatsSnapshot,
    ) -> IncrementalSearch {
        self.begin_with(start, goal, Box::new(snapshot))
    }

    pub fn begin_with(
        &self,
        start: &str,
        goal: &str,
        live: Box<dyn LiveFactor>,
    ) -> IncrementalSearch {
        let node_count = self.network.nodes().len();
        let (start, goal) = match (self.network.node_index(start), self.network.node_index(goal)) {
            (Some(start), Some(goal)) => (start, goal),
            // unknown endpoints: the handle reports unreachable on its first step
            _ => {
                return IncrementalSearch {
                    network: self.network.clone(),
                    heuristic: self.heuristic.clone(),
                    signal_delay: self.signal_delay.clone(),
                    live,
                    goal: 0,
                    open: BinaryHeap::new(),
                    g_score: Vec::new(),
                    parent: Vec::new(),
                    finished: Some(SearchStatus::Unreachable),
                }
            }
        };

        let mut open = BinaryHeap::new();
        let mut g_score = vec![f64::INFINITY; node_count];
        g_score[start] = 0.0;
        open.push(HeapEntry { f: 0.0, node: start });

        IncrementalSearch {
            network: self.network.clone(),
            heuristic: self.heuristic.clone(),
            signal_delay: self.signal_delay.clone(),
            live,
            goal,
            open,
            g_score,
            parent: vec![None; node_count],
            finished: None,
        }
    }

    /// Discards an unfinished search.
    pub fn abort(&self, search: IncrementalSearch) {
        drop(search);
    }
}

/// State of one cooperative search. Holds shared references to the immutable graph
/// and tables, so any number of searches can be in flight at once.
pub struct IncrementalSearch {
    network: Arc<Network>,
    heuristic: AltHeuristic,
    signal_delay: Arc<dyn SignalDelay>,
    live: Box<dyn LiveFactor>,
    goal: usize,
    open: BinaryHeap<HeapEntry>,
    g_score: Vec<f64>,
    parent: Vec<Option<usize>>,
    finished: Option<SearchStatus>,
}

impl IncrementalSearch {
    /// Expands at most `max_expansions` nodes and yields. Calling `step` again after
    /// completion returns the cached result.
    pub fn step(&mut self, max_expansions: usize) -> SearchStatus {
        if let Some(finished) = &self.finished {
            return finished.clone();
        }

        let mut expanded = 0;
        while expanded < max_expansions {
            let Some(entry) = self.open.pop() else {
                return self.finish(SearchStatus::Unreachable);
            };
            let u = entry.node;

            if u == self.goal {
                let route = Route {
                    travel_time: self.g_score[u],
                    nodes: self.extract_path(),
                };
                return self.finish(SearchStatus::Done(route));
            }

            for out in self.network.out_edges(u) {
                let factor = sanitize_factor(self.live.factor(out.edge));
                // the signal delay applies on arrival at the head node, never on departure
                let candidate = self.g_score[u]
                    + out.base_time * factor
                    + self.signal_delay.delay_at(out.to).max(0.0);

                if candidate < self.g_score[out.to] {
                    self.g_score[out.to] = candidate;
                    self.parent[out.to] = Some(u);
                    let h = self.heuristic.estimate(out.to, self.goal, candidate);
                    // re-insertion instead of decrease-key, stale entries resolve via g_score
                    self.open.push(HeapEntry {
                        f: candidate + h,
                        node: out.to,
                    });
                }
            }
            expanded += 1;
        }

        if self.open.is_empty() {
            self.finish(SearchStatus::Unreachable)
        } else {
            SearchStatus::Running
        }
    }

    fn finish(&mut self, status: SearchStatus) -> SearchStatus {
        self.finished = Some(status.clone());
        status
    }

    fn extract_path(&self) -> Vec<String> {
        let mut path = Vec::new();
        let mut current = self.goal;
        path.push(self.network.node(current).id.clone());
        while let Some(previous) = self.parent[current] {
            path.push(self.network.node(previous).id.clone());
            current = previous;
        }
        path.reverse();
        path
    }
}

fn sanitize_factor(factor: f64) -> f64 {
    if factor.is_nan() {
        return 1.0;
    }
    factor.max(0.1)
}

#[derive(PartialEq)]
struct HeapEntry {
    f: f64,
    node: usize,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap is a max-heap, the search wants the smallest f first.
        // Ties resolve by node index, callers must not rely on a particular order.
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_approx_eq::assert_approx_eq;

    use super::{Router, SearchStatus};
    use crate::simulation::routing::snapshot::{LiveFactor, SignalDelay};
    use crate::simulation::test_util::{
        diamond_network, landmark_tables_for, three_node_network,
    };

    fn chain_router() -> Router {
        let network = Arc::new(three_node_network());
        let tables = Arc::new(landmark_tables_for(&network, &["a"]));
        Router::new(network, tables)
    }

    #[test]
    fn plan_on_chain() {
        let router = chain_router();
        let route = router.plan("a", "c").unwrap();
        assert_approx_eq!(12.0, route.travel_time);
        assert_eq!(vec!["a", "b", "c"], route.nodes);
    }

    #[test]
    fn plan_against_arc_direction_is_unreachable() {
        let router = chain_router();
        assert!(router.plan("c", "a").is_none());
    }

    #[test]
    fn unknown_endpoints_are_unreachable() {
        let router = chain_router();
        assert!(router.plan("a", "nope").is_none());
        assert!(router.plan("nope", "c").is_none());

        let mut search = router.begin_incremental("nope", "c", Default::default());
        assert_eq!(SearchStatus::Unreachable, search.step(10));
    }

    #[test]
    fn matches_dijkstra_under_uniform_conditions() {
        let network = Arc::new(diamond_network());
        let tables = Arc::new(landmark_tables_for(&network, &["a", "d"]));
        let router = Router::new(network.clone(), tables);

        let route = router.plan("a", "d").unwrap();
        assert_approx_eq!(8.0, route.travel_time);
        assert_eq!(vec!["a", "b", "d"], route.nodes);
    }

    struct StubFactor {
        edge: usize,
        factor: f64,
    }

    impl StubFactor {
        fn for_edge(router: &Router, edge_id: &str, factor: f64) -> Box<Self> {
            let edge = router.network().edge_index(edge_id).unwrap();
            Box::new(StubFactor { edge, factor })
        }
    }

    impl LiveFactor for StubFactor {
        fn factor(&self, edge: usize) -> f64 {
            if edge == self.edge {
                self.factor
            } else {
                1.0
            }
        }
    }

    #[test]
    fn live_factor_scales_edge_cost() {
        let router = chain_router();
        let stub = StubFactor::for_edge(&router, "ab", 2.0);
        let route = router.plan_with("a", "c", stub).unwrap();
        // 5 * 2 + 7
        assert_approx_eq!(17.0, route.travel_time);
        assert_eq!(vec!["a", "b", "c"], route.nodes);
    }

    #[test]
    fn factors_below_floor_are_clamped() {
        let router = chain_router();
        let stub = StubFactor::for_edge(&router, "ab", 0.0);
        let route = router.plan_with("a", "c", stub).unwrap();
        // clamp(0.0) -> 0.1: 5 * 0.1 + 7
        assert_approx_eq!(7.5, route.travel_time);
    }

    #[test]
    fn nan_factor_is_neutral() {
        let router = chain_router();
        let stub = StubFactor::for_edge(&router, "ab", f64::NAN);
        let route = router.plan_with("a", "c", stub).unwrap();
        assert_approx_eq!(12.0, route.travel_time);
    }

    struct StubDelay;

    impl SignalDelay for StubDelay {
        fn delay_at(&self, node: usize) -> f64 {
            // a: large delay that must not count, b: 3 seconds on arrival
            match node {
                0 => 100.0,
                1 => 3.0,
                _ => 0.0,
            }
        }
    }

    #[test]
    fn signal_delay_applies_on_arrival_only() {
        let mut router = chain_router();
        router.set_signal_delay(Arc::new(StubDelay));
        let route = router.plan("a", "c").unwrap();
        // 5 + 3 + 7, the delay at the start node is never paid
        assert_approx_eq!(15.0, route.travel_time);
    }

    #[test]
    fn incremental_matches_blocking_for_any_step_budget() {
        let network = Arc::new(diamond_network());
        let tables = Arc::new(landmark_tables_for(&network, &["a", "d"]));
        let router = Router::new(network, tables);
        let blocking = router.plan("a", "d").unwrap();

        for budget in 1..=5 {
            let mut search = router.begin_incremental("a", "d", Default::default());
            let mut steps = 0;
            let route = loop {
                match search.step(budget) {
                    SearchStatus::Running => steps += 1,
                    SearchStatus::Done(route) => break route,
                    SearchStatus::Unreachable => panic!("goal must be reachable"),
                }
                assert!(steps < 100, "search must terminate");
            };
            assert_eq!(blocking, route);
        }
    }

    #[test]
    fn finished_search_returns_cached_result() {
        let router = chain_router();
        let mut search = router.begin_incremental("a", "c", Default::default());
        let first = search.step(usize::MAX);
        let second = search.step(1);
        assert_eq!(first, second);
    }

    #[test]
    fn exhausted_frontier_is_unreachable() {
        let router = chain_router();
        let mut search = router.begin_incremental("c", "a", Default::default());
        loop {
            match search.step(1) {
                SearchStatus::Running => {}
                SearchStatus::Unreachable => break,
                SearchStatus::Done(_) => panic!("there is no path from c to a"),
            }
        }
    }

    #[test]
    fn abort_discards_search() {
        let router = chain_router();
        let search = router.begin_incremental("a", "c", Default::default());
        router.abort(search);
    }
}
