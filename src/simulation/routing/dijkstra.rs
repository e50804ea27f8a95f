use std::cmp::Ordering;

use keyed_priority_queue::{Entry, KeyedPriorityQueue};

use crate::simulation::network::Network;

/// Priority wrapper with reversed ordering, so the keyed queue pops the smallest
/// travel time first. Travel times are never NaN, `total_cmp` keeps Ord total anyway.
#[derive(PartialEq)]
pub struct TravelTime(pub f64);

impl Eq for TravelTime {}

impl Ord for TravelTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0).reverse()
    }
}

impl PartialOrd for TravelTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct Dijkstra {}

impl Dijkstra {
    /// Single-source shortest travel times over `base_time` weights. Unreachable nodes
    /// keep `f64::INFINITY`.
    pub fn travel_times_from(network: &Network, from: usize) -> Vec<f64> {
        let (mut queue, mut times) = Self::get_initial_queue(network.nodes().len(), from);

        while let Some((current, current_time)) = queue.pop() {
            if current_time.0.is_infinite() {
                // the smallest value in the queue was unreachable, abort here
                return times;
            }

            for out in network.out_edges(current) {
                if let Entry::Vacant(_) = queue.entry(out.to) {
                    continue;
                }

                let candidate = current_time.0 + out.base_time;
                if times[out.to] > candidate {
                    match queue.entry(out.to) {
                        Entry::Occupied(e) => {
                            e.set_priority(TravelTime(candidate));
                        }
                        Entry::Vacant(_) => {
                            unreachable!()
                        }
                    }
                    times[out.to] = candidate;
                }
            }
        }
        times
    }

    fn get_initial_queue(
        node_count: usize,
        from: usize,
    ) -> (KeyedPriorityQueue<usize, TravelTime>, Vec<f64>) {
        let mut queue = KeyedPriorityQueue::new();
        let mut times = Vec::with_capacity(node_count);
        for i in 0..node_count {
            let time = if i == from { 0.0 } else { f64::INFINITY };
            times.push(time);
            queue.push(i, TravelTime(time));
        }
        (queue, times)
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::Dijkstra;
    use crate::simulation::test_util::{diamond_network, three_node_network};

    #[test]
    fn chain_travel_times() {
        let network = three_node_network();
        let a = network.node_index("a").unwrap();
        let times = Dijkstra::travel_times_from(&network, a);

        assert_approx_eq!(0.0, times[a]);
        assert_approx_eq!(5.0, times[network.node_index("b").unwrap()]);
        assert_approx_eq!(12.0, times[network.node_index("c").unwrap()]);
    }

    #[test]
    fn unreachable_stays_infinite() {
        let network = three_node_network();
        let c = network.node_index("c").unwrap();
        let times = Dijkstra::travel_times_from(&network, c);

        assert_approx_eq!(0.0, times[c]);
        assert!(times[network.node_index("a").unwrap()].is_infinite());
        assert!(times[network.node_index("b").unwrap()].is_infinite());
    }

    #[test]
    fn picks_faster_of_two_branches() {
        let network = diamond_network();
        let a = network.node_index("a").unwrap();
        let d = network.node_index("d").unwrap();
        let times = Dijkstra::travel_times_from(&network, a);

        // via b: 4 + 4, via c: 10 + 10
        assert_approx_eq!(8.0, times[d]);
    }
}
