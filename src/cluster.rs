//! Connected components of the halo graph.
//!
//! A [`Cluster`] holds a set of node indices into a shared [`NodeArena`],
//! its periodicity once classified, and per-node tortuosity once tortured.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::tortuosity::{AcceleratedBackend, EngineError, ReferenceEngine, TortuosityEngine};
use crate::types::{Node, NodeArena, Periodicity};

/// Error type for cluster operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    /// Node index not part of this cluster.
    #[error("Node {0} is not in this cluster")]
    NodeNotFound(usize),
    /// Clusters built over different arenas cannot be combined.
    #[error("Clusters belong to different node arenas")]
    ForeignArena,
    /// A node of a periodic cluster never reached one of its images.
    #[error("Node {node} in a {periodic}-periodic cluster has no reachable periodic image")]
    NoPeriodicImage {
        /// Unit-cell node whose search failed.
        node: usize,
        /// Periodicity the cluster was classified with.
        periodic: Periodicity,
    },
    /// Tortuosity engine failure.
    #[error("Tortuosity engine error: {0}")]
    Engine(#[from] EngineError),
}

/// A set of connected nodes.
#[derive(Debug, Clone)]
pub struct Cluster {
    arena: Arc<NodeArena>,
    nodes: BTreeSet<usize>,
    periodic: Option<Periodicity>,
    tortuosity: Option<f64>,
    node_tortuosity: BTreeMap<usize, u32>,
}

impl Cluster {
    /// Create a cluster from node indices of `arena`.
    ///
    /// Fails with [`ClusterError::NodeNotFound`] on the first index the
    /// arena does not hold.
    pub fn new(
        arena: Arc<NodeArena>,
        nodes: impl IntoIterator<Item = usize>,
    ) -> Result<Self, ClusterError> {
        let nodes: BTreeSet<usize> = nodes.into_iter().collect();
        if let Some(&missing) = nodes.iter().find(|&&i| i >= arena.len()) {
            return Err(ClusterError::NodeNotFound(missing));
        }
        Ok(Self::from_members(arena, nodes))
    }

    /// Members must already be valid arena indices.
    fn from_members(arena: Arc<NodeArena>, nodes: BTreeSet<usize>) -> Self {
        Self {
            arena,
            nodes,
            periodic: None,
            tortuosity: None,
            node_tortuosity: BTreeMap::new(),
        }
    }

    /// The arena the cluster's indices refer to.
    pub fn arena(&self) -> &Arc<NodeArena> {
        &self.arena
    }

    /// Node indices, ascending.
    pub fn node_indices(&self) -> &BTreeSet<usize> {
        &self.nodes
    }

    /// Nodes, in index order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter_map(|&i| self.arena.get(i))
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the cluster has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `index` belongs to the cluster.
    pub fn contains(&self, index: usize) -> bool {
        self.nodes.contains(&index)
    }

    /// Node by index; fails if the node is not in this cluster.
    pub fn node(&self, index: usize) -> Result<&Node, ClusterError> {
        if !self.nodes.contains(&index) {
            return Err(ClusterError::NodeNotFound(index));
        }
        self.arena.get(index).ok_or(ClusterError::NodeNotFound(index))
    }

    /// Expand to the full connected component of the current nodes.
    pub fn grow(&mut self) {
        self.grow_where(|_| true);
    }

    /// Expand along neighbours satisfying `admit`.
    ///
    /// Current nodes stay in the cluster whether or not they satisfy the
    /// predicate; only newly reached nodes are filtered.
    pub fn grow_where<F>(&mut self, admit: F)
    where
        F: Fn(&Node) -> bool,
    {
        let mut worklist: Vec<usize> = self.nodes.iter().copied().collect();
        while let Some(current) = worklist.pop() {
            let Some(node) = self.arena.get(current) else {
                continue;
            };
            for &neighbour in &node.neighbours {
                if self.nodes.contains(&neighbour) {
                    continue;
                }
                if let Some(next) = self.arena.get(neighbour) {
                    if admit(next) {
                        self.nodes.insert(neighbour);
                        worklist.push(neighbour);
                    }
                }
            }
        }
        self.invalidate();
    }

    /// New cluster holding the union of both node sets.
    pub fn merge(&self, other: &Cluster) -> Result<Cluster, ClusterError> {
        if !Arc::ptr_eq(&self.arena, &other.arena) {
            return Err(ClusterError::ForeignArena);
        }
        Ok(Cluster::from_members(
            Arc::clone(&self.arena),
            self.nodes.union(&other.nodes).copied().collect(),
        ))
    }

    /// Whether the two clusters share a node.
    pub fn is_neighbour(&self, other: &Cluster) -> bool {
        Arc::ptr_eq(&self.arena, &other.arena) && !self.nodes.is_disjoint(&other.nodes)
    }

    /// Nodes matching a predicate (generalized label filter).
    pub fn key_nodes<F>(&self, predicate: F) -> Vec<&Node>
    where
        F: Fn(&Node) -> bool,
    {
        self.nodes().filter(|n| predicate(*n)).collect()
    }

    /// Nodes inside the central cell.
    pub fn unit_cell_nodes(&self) -> Vec<&Node> {
        self.key_nodes(|n| !n.is_halo)
    }

    /// Nodes in the surrounding replicas.
    pub fn halo_nodes(&self) -> Vec<&Node> {
        self.key_nodes(|n| n.is_halo)
    }

    /// Distinct unit-cell sites present.
    pub fn unique_uc_indices(&self) -> BTreeSet<usize> {
        self.nodes().map(|n| n.uc_index).collect()
    }

    /// Classify periodicity from the image count of the lowest-index node's site.
    pub fn set_periodic(&mut self) -> Periodicity {
        let periodic = match self.nodes().next() {
            None => Periodicity::Isolated,
            Some(reference) => {
                let uc_index = reference.uc_index;
                let images = self.nodes().filter(|n| n.uc_index == uc_index).count();
                if !Periodicity::is_regular_image_count(images) {
                    warn!(
                        uc_index,
                        images,
                        cluster_size = self.nodes.len(),
                        "Irregular periodic image count; classifying cluster as non-periodic"
                    );
                }
                Periodicity::from_image_count(images)
            }
        };
        self.periodic = Some(periodic);
        periodic
    }

    /// Periodicity, if classified.
    pub fn periodic(&self) -> Option<Periodicity> {
        self.periodic
    }

    /// Average tortuosity of the unit-cell nodes, if tortured.
    pub fn tortuosity(&self) -> Option<f64> {
        self.tortuosity
    }

    /// Tortuosity of one unit-cell node, if tortured and defined.
    pub fn node_tortuosity(&self, index: usize) -> Result<Option<u32>, ClusterError> {
        self.node(index)?;
        Ok(self.node_tortuosity.get(&index).copied())
    }

    /// All defined per-node tortuosities, keyed by node index.
    pub fn node_tortuosities(&self) -> &BTreeMap<usize, u32> {
        &self.node_tortuosity
    }

    /// Torture with the sequential reference engine.
    pub fn torture_reference(&mut self) -> Result<(), ClusterError> {
        let arena = Arc::clone(&self.arena);
        let mut engine = ReferenceEngine::new(&arena);
        self.torture_with(&mut engine)
    }

    /// Torture with an accelerated backend already loaded with this cluster's arena.
    pub fn torture(&mut self, backend: &mut AcceleratedBackend) -> Result<(), ClusterError> {
        if backend.total_nodes() != self.arena.len() {
            if !backend.is_allocated() {
                return Err(EngineError::NotAllocated.into());
            }
            return Err(EngineError::TopologyMismatch {
                allocated: backend.total_nodes(),
                expected: self.arena.len(),
            }
            .into());
        }
        self.torture_with(backend)
    }

    /// Compute per-node and average tortuosity with any engine.
    ///
    /// Searches never leave the cluster's own nodes. Only periodic clusters
    /// are searched; every unit-cell node there must reach an image of
    /// itself, and a failed search means the graph is malformed. Non-periodic
    /// clusters get no per-node values and an average of 0.
    pub fn torture_with<E>(&mut self, engine: &mut E) -> Result<(), ClusterError>
    where
        E: TortuosityEngine + ?Sized,
    {
        let periodic = match self.periodic {
            Some(p) => p,
            None => self.set_periodic(),
        };
        let seeds = if periodic.is_periodic() {
            self.unit_cell_indices()
        } else {
            Vec::new()
        };
        let results = engine.seed_tortuosities(&seeds, &self.nodes)?;

        let mut node_tortuosity = BTreeMap::new();
        for (&seed, result) in seeds.iter().zip(results) {
            match result {
                Some(t) => {
                    node_tortuosity.insert(seed, t);
                }
                None => {
                    return Err(ClusterError::NoPeriodicImage { node: seed, periodic });
                }
            }
        }

        let average = if node_tortuosity.is_empty() {
            0.0
        } else {
            node_tortuosity.values().map(|&t| f64::from(t)).sum::<f64>() / node_tortuosity.len() as f64
        };
        debug!(
            engine = engine.name(),
            seeds = seeds.len(),
            periodic = periodic.degree(),
            average,
            "Tortured cluster"
        );

        self.node_tortuosity = node_tortuosity;
        self.tortuosity = Some(average);
        Ok(())
    }

    fn unit_cell_indices(&self) -> Vec<usize> {
        self.unit_cell_nodes().iter().map(|n| n.index).collect()
    }

    fn invalidate(&mut self) {
        self.periodic = None;
        self.tortuosity = None;
        self.node_tortuosity.clear();
    }
}

/// Split an arena into connected components seeded from unit-cell nodes.
///
/// Seeds are taken in ascending index order; halo nodes join only by
/// traversal. Each returned cluster has its periodicity classified.
pub fn clusters_from_nodes(arena: &Arc<NodeArena>) -> Vec<Cluster> {
    let mut unvisited: BTreeSet<usize> = arena.unit_cell_nodes().map(|n| n.index).collect();
    let mut clusters = Vec::new();

    while let Some(seed) = unvisited.pop_first() {
        let mut cluster = Cluster::from_members(Arc::clone(arena), BTreeSet::from([seed]));
        cluster.grow();
        for index in cluster.node_indices() {
            unvisited.remove(index);
        }
        cluster.set_periodic();
        clusters.push(cluster);
    }

    debug!(
        clusters = clusters.len(),
        periodic = clusters.iter().filter(|c| c.periodic().is_some_and(Periodicity::is_periodic)).count(),
        "Found clusters"
    );
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::halo::HALO_IMAGES;

    /// Nodes 0..n with `uc_index` from `uc`, halo flags from `halo`, and undirected `edges`.
    fn arena(uc: &[usize], halo: &[bool], edges: &[(usize, usize)]) -> Arc<NodeArena> {
        let mut nodes: Vec<Node> = uc
            .iter()
            .zip(halo)
            .enumerate()
            .map(|(i, (&u, &h))| Node::new(i, "Li", u, h))
            .collect();
        for &(a, b) in edges {
            nodes[a].neighbours.insert(b);
            nodes[b].neighbours.insert(a);
        }
        Arc::new(NodeArena::from_nodes(nodes).unwrap())
    }

    fn path(n: usize) -> Arc<NodeArena> {
        let uc: Vec<usize> = (0..n).collect();
        let halo = vec![false; n];
        let edges: Vec<(usize, usize)> = (1..n).map(|i| (i - 1, i)).collect();
        arena(&uc, &halo, &edges)
    }

    fn images(count: usize) -> Arc<NodeArena> {
        let uc = vec![0; count];
        let halo: Vec<bool> = (0..count).map(|i| i != 0).collect();
        let edges: Vec<(usize, usize)> = (1..count).map(|i| (i - 1, i)).collect();
        arena(&uc, &halo, &edges)
    }

    #[test]
    fn test_grow_reaches_component() {
        let a = path(5);
        let mut cluster = Cluster::new(Arc::clone(&a), [2]).unwrap();
        cluster.grow();
        assert_eq!(cluster.len(), 5);
    }

    #[test]
    fn test_grow_is_idempotent() {
        let mut cluster = Cluster::new(path(6), [0]).unwrap();
        cluster.grow();
        let once = cluster.node_indices().clone();
        cluster.grow();
        assert_eq!(cluster.node_indices(), &once);
    }

    #[test]
    fn test_grow_uses_every_current_node_as_seed() {
        let a = arena(&[0, 1, 2, 3], &[false; 4], &[(0, 1), (2, 3)]);
        let mut cluster = Cluster::new(a, [0, 2]).unwrap();
        cluster.grow();
        assert_eq!(cluster.len(), 4);
    }

    #[test]
    fn test_grow_where_filters_new_nodes() {
        // 0 - 1(halo) - 2
        let a = arena(&[0, 1, 2], &[false, true, false], &[(0, 1), (1, 2)]);
        let mut cluster = Cluster::new(a, [0]).unwrap();
        cluster.grow_where(|n| !n.is_halo);
        assert_eq!(cluster.node_indices(), &BTreeSet::from([0]));
    }

    #[test]
    fn test_merge_and_is_neighbour() {
        let a = path(4);
        let left = Cluster::new(Arc::clone(&a), [0, 1]).unwrap();
        let right = Cluster::new(Arc::clone(&a), [1, 2, 3]).unwrap();
        let far = Cluster::new(Arc::clone(&a), [3]).unwrap();
        assert!(left.is_neighbour(&right));
        assert!(!left.is_neighbour(&far));
        assert_eq!(left.merge(&right).unwrap().len(), 4);

        let other = Cluster::new(path(4), [0]).unwrap();
        assert_eq!(left.merge(&other).unwrap_err(), ClusterError::ForeignArena);
        assert!(!left.is_neighbour(&other));
    }

    #[test]
    fn test_periodicity_from_image_counts() {
        for (count, expected) in [
            (HALO_IMAGES, Periodicity::Three),
            (9, Periodicity::Two),
            (3, Periodicity::One),
            (1, Periodicity::Isolated),
            (5, Periodicity::Isolated),
        ] {
            let mut cluster = Cluster::new(images(count), 0..count).unwrap();
            assert_eq!(cluster.set_periodic(), expected, "count {count}");
        }
    }

    #[test]
    fn test_empty_cluster_is_not_periodic() {
        let mut cluster = Cluster::new(path(2), Vec::new()).unwrap();
        assert_eq!(cluster.set_periodic(), Periodicity::Isolated);
    }

    #[test]
    fn test_new_rejects_unknown_index() {
        assert_eq!(
            Cluster::new(path(3), [0, 99]).unwrap_err(),
            ClusterError::NodeNotFound(99)
        );
        assert_eq!(Cluster::new(path(3), [2, 0]).unwrap().len(), 2);
    }

    #[test]
    fn test_node_lookup_outside_cluster_fails() {
        let cluster = Cluster::new(path(3), [0, 1]).unwrap();
        assert_eq!(cluster.node(1).unwrap().index, 1);
        assert_eq!(cluster.node(2).unwrap_err(), ClusterError::NodeNotFound(2));
        assert_eq!(cluster.node(99).unwrap_err(), ClusterError::NodeNotFound(99));
    }

    #[test]
    fn test_partitions_and_unique_indices() {
        let a = arena(&[0, 0, 1], &[false, true, false], &[(0, 1), (1, 2)]);
        let cluster = Cluster::new(a, 0..3).unwrap();
        assert_eq!(cluster.unit_cell_nodes().len(), 2);
        assert_eq!(cluster.halo_nodes().len(), 1);
        assert_eq!(cluster.unique_uc_indices(), BTreeSet::from([0, 1]));
    }

    #[test]
    fn test_clusters_seed_only_from_unit_cell_nodes() {
        // 0(uc) - 1(halo); 2(halo) isolated
        let a = arena(&[0, 0, 1], &[false, true, true], &[(0, 1)]);
        let clusters = clusters_from_nodes(&a);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].node_indices(), &BTreeSet::from([0, 1]));
    }

    #[test]
    fn test_torture_reference_ring_of_three_images() {
        let a = arena(&[0, 0, 0], &[false, true, true], &[(0, 1), (1, 2), (2, 0)]);
        let mut cluster = Cluster::new(a, 0..3).unwrap();
        cluster.torture_reference().unwrap();
        assert_eq!(cluster.periodic(), Some(Periodicity::One));
        assert_eq!(cluster.node_tortuosity(0).unwrap(), Some(1));
        assert_eq!(cluster.node_tortuosity(1).unwrap(), None);
        assert_eq!(cluster.tortuosity(), Some(1.0));
    }

    #[test]
    fn test_torture_non_periodic_leaves_nodes_undefined() {
        let mut cluster = Cluster::new(path(3), 0..3).unwrap();
        cluster.torture_reference().unwrap();
        assert!(cluster.node_tortuosities().is_empty());
        assert_eq!(cluster.tortuosity(), Some(0.0));
    }

    #[test]
    fn test_partial_cluster_ignores_images_outside_it() {
        // a ring of three images, but the cluster only holds node 0
        let a = arena(&[0, 0, 0], &[false, true, true], &[(0, 1), (1, 2), (2, 0)]);
        let mut cluster = Cluster::new(a, [0]).unwrap();
        cluster.torture_reference().unwrap();
        assert_eq!(cluster.periodic(), Some(Periodicity::Isolated));
        assert_eq!(cluster.node_tortuosity(0).unwrap(), None);
        assert!(cluster.node_tortuosities().is_empty());
        assert_eq!(cluster.tortuosity(), Some(0.0));
    }

    #[test]
    fn test_periodic_search_stays_inside_cluster() {
        // 0 - 1 - 2 - 3 inside the cluster; 4 is a closer image of site 0 outside it
        let a = arena(
            &[0, 1, 0, 0, 0],
            &[false, true, true, true, true],
            &[(0, 1), (1, 2), (2, 3), (0, 4)],
        );
        let mut cluster = Cluster::new(a, 0..4).unwrap();
        cluster.torture_reference().unwrap();
        assert_eq!(cluster.periodic(), Some(Periodicity::One));
        assert_eq!(cluster.node_tortuosity(0).unwrap(), Some(2));
        assert_eq!(cluster.tortuosity(), Some(2.0));
    }

    #[test]
    fn test_periodic_cluster_without_reachable_image_is_error() {
        // classified as 1-periodic from site 0, but site 1's node sees no image
        let a = arena(
            &[0, 0, 0, 1],
            &[false, true, true, false],
            &[(0, 1), (1, 2), (2, 3)],
        );
        let mut cluster = Cluster::new(a, 0..4).unwrap();
        assert_eq!(cluster.set_periodic(), Periodicity::One);
        assert_eq!(
            cluster.torture_reference(),
            Err(ClusterError::NoPeriodicImage { node: 3, periodic: Periodicity::One })
        );
    }

    #[test]
    fn test_grow_invalidates_results() {
        let a = arena(&[0, 0, 0], &[false, true, true], &[(0, 1), (1, 2), (2, 0)]);
        let mut cluster = Cluster::new(a, [0]).unwrap();
        cluster.torture_reference().unwrap();
        cluster.grow();
        assert_eq!(cluster.periodic(), None);
        assert_eq!(cluster.tortuosity(), None);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_torture_requires_loaded_backend() {
        let mut backend = AcceleratedBackend::new().unwrap();
        let mut cluster = Cluster::new(path(3), 0..3).unwrap();
        assert_eq!(
            cluster.torture(&mut backend),
            Err(ClusterError::Engine(EngineError::NotAllocated))
        );
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_torture_rejects_backend_loaded_with_other_arena() {
        let mut backend = AcceleratedBackend::new().unwrap();
        backend.load_topology(&path(5)).unwrap();
        let mut cluster = Cluster::new(path(3), 0..3).unwrap();
        assert_eq!(
            cluster.torture(&mut backend),
            Err(ClusterError::Engine(EngineError::TopologyMismatch {
                allocated: 5,
                expected: 3,
            }))
        );
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_accelerated_search_stays_inside_cluster() {
        let a = arena(
            &[0, 1, 0, 0, 0],
            &[false, true, true, true, true],
            &[(0, 1), (1, 2), (2, 3), (0, 4)],
        );
        let mut backend = AcceleratedBackend::new().unwrap();
        backend.load_topology(&a).unwrap();
        let mut cluster = Cluster::new(a, 0..4).unwrap();
        cluster.torture(&mut backend).unwrap();
        assert_eq!(cluster.node_tortuosity(0).unwrap(), Some(2));
        assert_eq!(backend.tortuosity_of(0), Some(2));
    }
}
