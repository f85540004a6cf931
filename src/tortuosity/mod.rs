//! Shortest-path tortuosity engines.
//!
//! The tortuosity of a unit-cell node `v` is the fewest hops from `v` to
//! any other node of its cluster with the same `uc_index`, i.e. to its
//! nearest connected periodic image. Each seed runs an independent
//! breadth-first search, confined to the cluster's members, that stops at
//! the first such image it dequeues; layer order makes that the minimum.
//!
//! Two engines implement [`TortuosityEngine`]:
//!
//! | Engine | Execution | Adjacency |
//! |--------|-----------|-----------|
//! | [`ReferenceEngine`] | sequential | node arena |
//! | [`AcceleratedBackend`] | parallel over seeds (rayon) | flattened CSR |
//!
//! Both must return identical values for every seed.

use std::collections::BTreeSet;

pub mod accelerated;
pub mod reference;

pub use accelerated::{AcceleratedBackend, SharedBackend};
pub use reference::ReferenceEngine;

/// Error type for tortuosity engines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Crate built without the `parallel` feature.
    #[error("Accelerated tortuosity backend not available in this build; use the reference engine")]
    Unavailable,
    /// `compute` or `set_node_topology` called before `allocate`.
    #[error("Accelerated backend used before topology allocation")]
    NotAllocated,
    /// Node index outside the graph.
    #[error("Node index {index} out of range for {len} nodes")]
    NodeOutOfRange {
        /// Requested node.
        index: usize,
        /// Number of nodes.
        len: usize,
    },
    /// Unit-cell index outside the allocated site count.
    #[error("Unit-cell index {uc_index} out of range for {len} sites")]
    SiteOutOfRange {
        /// Requested site.
        uc_index: usize,
        /// Number of sites.
        len: usize,
    },
    /// Seed outside the member set it should be searched within.
    #[error("Seed node {0} is not a member of the searched cluster")]
    SeedNotMember(usize),
    /// Seed node whose topology was never set.
    #[error("Topology of node {0} was never set")]
    TopologyUnset(usize),
    /// Backend allocated for a graph of a different size.
    #[error("Backend holds {allocated} nodes but graph has {expected}")]
    TopologyMismatch {
        /// Nodes held by the backend.
        allocated: usize,
        /// Nodes in the graph being tortured.
        expected: usize,
    },
}

/// A tortuosity computation over a fixed graph.
pub trait TortuosityEngine {
    /// Short engine name for logs and reports.
    fn name(&self) -> &'static str;

    /// Tortuosity of each seed, in seed order.
    ///
    /// Searches only walk nodes in `members`, which must contain every
    /// seed. `None` means the seed's search exhausted the members reachable
    /// from it without meeting another image of its site.
    fn seed_tortuosities(
        &mut self,
        seeds: &[usize],
        members: &BTreeSet<usize>,
    ) -> Result<Vec<Option<u32>>, EngineError>;
}
