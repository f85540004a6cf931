//! Core types for the percolation graph.

pub mod minimal_cluster;
pub mod node;
pub mod periodicity;

pub use minimal_cluster::MinimalCluster;
pub use node::{ArenaError, Node, NodeArena};
pub use periodicity::Periodicity;
