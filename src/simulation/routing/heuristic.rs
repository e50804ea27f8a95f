use std::sync::Arc;

use crate::simulation::routing::landmarks::LandmarkTables;

/// Context handed to the adjustment hook, mirrors what the search knows at the time
/// the estimate is requested.
#[derive(Debug, Clone, Copy)]
pub struct AdjustContext {
    pub node: usize,
    pub goal: usize,
    /// cost accumulated from the start to `node`
    pub g: f64,
}

/// Post-processor for heuristic values, e.g. a learned correction model.
///
/// Contract (documented, not enforced): the adjusted value MUST NOT be smaller than
/// `base` and MUST NOT exceed the true optimal remaining cost, otherwise the search
/// loses optimality.
pub trait HeuristicAdjustment: Send + Sync {
    fn adjust(&self, base: f64, ctx: &AdjustContext) -> f64;
}

/// The default hook. No safe non-trivial adjustment is known, so it returns the
/// landmark bound unchanged.
pub struct IdentityAdjustment;

impl HeuristicAdjustment for IdentityAdjustment {
    fn adjust(&self, base: f64, _ctx: &AdjustContext) -> f64 {
        base
    }
}

/// ALT lower bound: `max over landmarks of |d(goal) - d(node)|`.
///
/// Landmarks with an infinite entry on either side contribute nothing. Without any
/// contributing landmark the estimate is 0 and the search degrades to Dijkstra,
/// which stays admissible.
#[derive(Clone)]
pub struct AltHeuristic {
    tables: Arc<LandmarkTables>,
    adjustment: Arc<dyn HeuristicAdjustment>,
}

impl AltHeuristic {
    pub fn new(tables: Arc<LandmarkTables>) -> Self {
        Self::with_adjustment(tables, Arc::new(IdentityAdjustment))
    }

    pub fn with_adjustment(
        tables: Arc<LandmarkTables>,
        adjustment: Arc<dyn HeuristicAdjustment>,
    ) -> Self {
        AltHeuristic { tables, adjustment }
    }

    pub fn estimate(&self, node: usize, goal: usize, g: f64) -> f64 {
        let mut base = 0.0;
        for table in self.tables.tables() {
            let d_node = table[node];
            let d_goal = table[goal];
            if !d_node.is_finite() || !d_goal.is_finite() {
                continue;
            }
            base = f64::max(base, (d_goal - d_node).abs());
        }
        self.adjustment.adjust(base, &AdjustContext { node, goal, g })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_approx_eq::assert_approx_eq;

    use super::{AdjustContext, AltHeuristic, HeuristicAdjustment};
    use crate::simulation::routing::dijkstra::Dijkstra;
    use crate::simulation::test_util::{diamond_network, landmark_tables_for, three_node_network};

    #[test]
    fn landmark_with_infinite_entries_contributes_nothing() {
        let network = three_node_network();
        let tables = landmark_tables_for(&network, &["c"]);
        let heuristic = AltHeuristic::new(Arc::new(tables));

        let a = network.node_index("a").unwrap();
        let c = network.node_index("c").unwrap();
        // the chain is directed, from c nothing is reachable: d_c(a) is infinite and
        // the estimate falls back to the admissible 0
        assert_approx_eq!(0.0, heuristic.estimate(a, c, 0.0));
    }

    #[test]
    fn estimate_from_start_landmark_is_tight() {
        let network = three_node_network();
        let tables = landmark_tables_for(&network, &["a"]);
        let heuristic = AltHeuristic::new(Arc::new(tables));

        let a = network.node_index("a").unwrap();
        let c = network.node_index("c").unwrap();
        // |d_a(c) - d_a(a)| = |12 - 0|
        assert_approx_eq!(12.0, heuristic.estimate(a, c, 0.0));
    }

    #[test]
    fn estimate_at_goal_is_zero() {
        let network = diamond_network();
        let tables = landmark_tables_for(&network, &["a", "d"]);
        let heuristic = AltHeuristic::new(Arc::new(tables));
        let d = network.node_index("d").unwrap();
        assert_approx_eq!(0.0, heuristic.estimate(d, d, 0.0));
    }

    #[test]
    fn admissible_against_dijkstra_truth() {
        let network = diamond_network();
        let tables = landmark_tables_for(&network, &["a", "b", "c", "d"]);
        let heuristic = AltHeuristic::new(Arc::new(tables));

        for start in 0..network.nodes().len() {
            let truth = Dijkstra::travel_times_from(&network, start);
            for goal in 0..network.nodes().len() {
                if truth[goal].is_finite() {
                    assert!(
                        heuristic.estimate(start, goal, 0.0) <= truth[goal] + 1e-9,
                        "h({start},{goal}) overestimates"
                    );
                }
            }
        }
    }

    struct ConstantBoost(f64);

    impl HeuristicAdjustment for ConstantBoost {
        fn adjust(&self, base: f64, _ctx: &AdjustContext) -> f64 {
            base + self.0
        }
    }

    #[test]
    fn adjustment_hook_post_processes() {
        let network = three_node_network();
        let tables = landmark_tables_for(&network, &["a"]);
        let heuristic =
            AltHeuristic::with_adjustment(Arc::new(tables), Arc::new(ConstantBoost(0.5)));

        let a = network.node_index("a").unwrap();
        let c = network.node_index("c").unwrap();
        assert_approx_eq!(12.5, heuristic.estimate(a, c, 0.0));
    }
}
