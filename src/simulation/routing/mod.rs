pub mod astar;
pub mod dijkstra;
pub mod heuristic;
pub mod landmarks;
pub mod snapshot;
