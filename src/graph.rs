//! Whole-halo aggregation.
//!
//! The halo contains up to 27 translated copies of every true cluster.
//! [`Graph`] keeps all of them, tortures the periodic ones, and collapses the
//! copies into [`MinimalCluster`]s keyed by the unit-cell sites they cover.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, info_span, warn};

use crate::cluster::{Cluster, ClusterError};
use crate::config::EngineKind;
use crate::structure::{Structure, StructureError};
use crate::tortuosity::{AcceleratedBackend, EngineError, ReferenceEngine, SharedBackend};
use crate::types::{MinimalCluster, NodeArena, Periodicity};

/// Error type for graph-level operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Minimal clusters requested before a torture pass.
    #[error("Graph has not been tortured yet")]
    NotTortured,
    /// Copies of the same site set disagree on periodicity.
    #[error("Clusters covering sites {sites:?} disagree on periodicity ({first} vs {second})")]
    InconsistentPeriodicity {
        /// Shared unit-cell site set.
        sites: Vec<usize>,
        /// Periodicity seen first.
        first: Periodicity,
        /// Conflicting periodicity.
        second: Periodicity,
    },
    /// A site of a periodic cluster has no tortuosity after torture.
    #[error("Site {0} of a periodic cluster has no tortuosity")]
    MissingSiteTortuosity(usize),
    /// Structure export requested on a graph built without one.
    #[error("Graph has no source structure")]
    NoStructure,
    /// Cluster error.
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),
    /// Tortuosity engine error.
    #[error("Tortuosity engine error: {0}")]
    Engine(#[from] EngineError),
    /// Structure error.
    #[error("Structure error: {0}")]
    Structure(#[from] StructureError),
}

/// All clusters of one halo graph plus aggregated results.
#[derive(Debug, Clone)]
pub struct Graph {
    arena: Arc<NodeArena>,
    clusters: Vec<Cluster>,
    site_tortuosity: Option<BTreeMap<usize, u32>>,
    minimal_clusters: Option<Vec<MinimalCluster>>,
    structure: Option<Arc<Structure>>,
}

impl Graph {
    /// Create a graph from clusters over `arena`.
    ///
    /// `structure` is the filtered structure the arena was built from; it is
    /// only needed for [`periodic_structure`](Self::periodic_structure).
    pub fn new(
        arena: Arc<NodeArena>,
        clusters: Vec<Cluster>,
        structure: Option<Arc<Structure>>,
    ) -> Result<Self, GraphError> {
        if clusters.iter().any(|c| !Arc::ptr_eq(c.arena(), &arena)) {
            return Err(ClusterError::ForeignArena.into());
        }
        Ok(Self {
            arena,
            clusters,
            site_tortuosity: None,
            minimal_clusters: None,
            structure,
        })
    }

    /// The shared node arena.
    pub fn arena(&self) -> &Arc<NodeArena> {
        &self.arena
    }

    /// All clusters, including halo copies.
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Source structure, if attached.
    pub fn structure(&self) -> Option<&Arc<Structure>> {
        self.structure.as_ref()
    }

    /// Whether a torture pass has completed.
    pub fn is_tortured(&self) -> bool {
        self.minimal_clusters.is_some()
    }

    /// Torture with a freshly created accelerated backend.
    pub fn torture(&mut self) -> Result<(), GraphError> {
        let mut backend = AcceleratedBackend::new()?;
        self.torture_with(&mut backend)
    }

    /// Torture with `backend`, loading this graph's topology into it.
    ///
    /// The backend is released before returning, also on error.
    pub fn torture_with(&mut self, backend: &mut AcceleratedBackend) -> Result<(), GraphError> {
        let _span = info_span!("torture", engine = "accelerated").entered();
        let result = self.torture_loaded(backend);
        backend.release();
        result?;
        self.aggregate()
    }

    fn torture_loaded(&mut self, backend: &mut AcceleratedBackend) -> Result<(), GraphError> {
        backend.load_topology(&self.arena)?;
        self.for_each_periodic(|cluster| cluster.torture(backend))
    }

    /// Torture inside one exclusive session of a shared backend.
    pub fn torture_shared(&mut self, shared: &SharedBackend) -> Result<(), GraphError> {
        shared.with_backend(|backend| self.torture_with(backend))
    }

    /// Torture with the sequential reference engine.
    pub fn torture_reference(&mut self) -> Result<(), GraphError> {
        let _span = info_span!("torture", engine = "reference").entered();
        let arena = Arc::clone(&self.arena);
        let mut engine = ReferenceEngine::new(&arena);
        self.for_each_periodic(|cluster| cluster.torture_with(&mut engine))?;
        self.aggregate()
    }

    /// Torture with the selected engine; returns the engine that ran.
    ///
    /// [`EngineKind::Auto`] falls back to the reference engine when the
    /// accelerated backend is unavailable.
    pub fn torture_with_engine(&mut self, kind: EngineKind) -> Result<EngineKind, GraphError> {
        match kind {
            EngineKind::Reference => {
                self.torture_reference()?;
                Ok(EngineKind::Reference)
            }
            EngineKind::Accelerated => {
                self.torture()?;
                Ok(EngineKind::Accelerated)
            }
            EngineKind::Auto => match AcceleratedBackend::new() {
                Ok(mut backend) => {
                    self.torture_with(&mut backend)?;
                    Ok(EngineKind::Accelerated)
                }
                Err(EngineError::Unavailable) => {
                    warn!("Accelerated backend unavailable; falling back to reference engine");
                    self.torture_reference()?;
                    Ok(EngineKind::Reference)
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Tortuosity per unit-cell site, `None` before a torture pass.
    ///
    /// Sites of non-periodic clusters are absent.
    pub fn site_tortuosity(&self) -> Option<&BTreeMap<usize, u32>> {
        self.site_tortuosity.as_ref()
    }

    /// Unique clusters, sorted by site indices.
    pub fn minimal_clusters(&self) -> Result<&[MinimalCluster], GraphError> {
        self.minimal_clusters.as_deref().ok_or(GraphError::NotTortured)
    }

    /// Fraction of unit-cell nodes that belong to periodic clusters.
    ///
    /// 0.0 when the graph has no unit-cell nodes.
    pub fn return_frac_percolating(&self) -> f64 {
        let (percolating, total) = self.clusters.iter().fold((0usize, 0usize), |(p, t), cluster| {
            let count = cluster.unit_cell_nodes().len();
            let periodic = cluster.periodic().is_some_and(Periodicity::is_periodic);
            (p + if periodic { count } else { 0 }, t + count)
        });
        if total == 0 {
            0.0
        } else {
            percolating as f64 / total as f64
        }
    }

    /// Unique unit-cell site sets, optionally only of periodic clusters.
    pub fn cluster_site_sets(&self, periodic_only: bool) -> BTreeSet<Vec<usize>> {
        self.clusters
            .iter()
            .filter(|c| !periodic_only || c.periodic().is_some_and(Periodicity::is_periodic))
            .map(|c| c.unique_uc_indices().into_iter().collect())
            .collect()
    }

    /// Sites of every periodic cluster as one structure.
    pub fn periodic_structure(&self) -> Result<Structure, GraphError> {
        let structure = self.structure.as_ref().ok_or(GraphError::NoStructure)?;
        let sites: BTreeSet<usize> = self.cluster_site_sets(true).into_iter().flatten().collect();
        Ok(structure.subset(&sites)?)
    }

    /// Structure of one unique site set, e.g. from [`cluster_site_sets`](Self::cluster_site_sets).
    pub fn cluster_structure(&self, sites: &[usize]) -> Result<Structure, GraphError> {
        let structure = self.structure.as_ref().ok_or(GraphError::NoStructure)?;
        Ok(structure.subset(sites)?)
    }

    fn for_each_periodic<F>(&mut self, mut torture: F) -> Result<(), GraphError>
    where
        F: FnMut(&mut Cluster) -> Result<(), ClusterError>,
    {
        for cluster in &mut self.clusters {
            let periodic = match cluster.periodic() {
                Some(p) => p,
                None => cluster.set_periodic(),
            };
            if periodic.is_periodic() {
                torture(cluster)?;
            }
        }
        Ok(())
    }

    fn aggregate(&mut self) -> Result<(), GraphError> {
        let mut site_tortuosity = BTreeMap::new();
        for cluster in &self.clusters {
            if !cluster.periodic().is_some_and(Periodicity::is_periodic) {
                continue;
            }
            for (&index, &t) in cluster.node_tortuosities() {
                if let Some(node) = self.arena.get(index) {
                    site_tortuosity.insert(node.uc_index, t);
                }
            }
        }

        let mut by_sites: BTreeMap<Vec<usize>, Periodicity> = BTreeMap::new();
        for cluster in &self.clusters {
            let periodic = cluster.periodic().unwrap_or(Periodicity::Isolated);
            let sites: Vec<usize> = cluster.unique_uc_indices().into_iter().collect();
            match by_sites.entry(sites) {
                Entry::Vacant(slot) => {
                    slot.insert(periodic);
                }
                Entry::Occupied(slot) if *slot.get() != periodic => {
                    return Err(GraphError::InconsistentPeriodicity {
                        sites: slot.key().clone(),
                        first: *slot.get(),
                        second: periodic,
                    });
                }
                Entry::Occupied(_) => {}
            }
        }

        let minimal_clusters = by_sites
            .into_iter()
            .map(|(sites, periodic)| {
                let tortuosity = if periodic.is_periodic() {
                    let total = sites.iter().try_fold(0.0, |sum, site| {
                        site_tortuosity
                            .get(site)
                            .map(|&t| sum + f64::from(t))
                            .ok_or(GraphError::MissingSiteTortuosity(*site))
                    })?;
                    Some(total / sites.len() as f64)
                } else {
                    None
                };
                Ok(MinimalCluster::new(sites, periodic, tortuosity))
            })
            .collect::<Result<Vec<_>, GraphError>>()?;

        info!(
            clusters = self.clusters.len(),
            minimal_clusters = minimal_clusters.len(),
            tortured_sites = site_tortuosity.len(),
            "Aggregated graph tortuosity"
        );
        self.site_tortuosity = Some(site_tortuosity);
        self.minimal_clusters = Some(minimal_clusters);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::clusters_from_nodes;
    use crate::halo::HaloGraphBuilder;
    use crate::structure::{Lattice, Site};
    use crate::types::Node;

    fn chain() -> Structure {
        Structure::new(
            Lattice::orthorhombic(1.0, 10.0, 10.0).unwrap(),
            vec![Site::new("Li", [0.0, 0.0, 0.0]), Site::new("Li", [0.0, 0.5, 0.5])],
        )
    }

    fn graph(structure: &Structure, cutoff: f64) -> Graph {
        let halo = HaloGraphBuilder::new(cutoff, ["Li"]).build(structure).unwrap();
        let arena = Arc::new(halo.arena);
        let clusters = clusters_from_nodes(&arena);
        Graph::new(arena, clusters, Some(Arc::new(halo.structure))).unwrap()
    }

    /// Arena of nodes with the given sites and halo flags, joined by undirected `edges`.
    fn hand_built(uc: &[usize], halo: &[bool], edges: &[(usize, usize)]) -> Arc<NodeArena> {
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

    #[test]
    fn test_copies_disagreeing_on_periodicity_are_rejected() {
        // ring of three site-0 images, plus a lone site-0 copy
        let arena = hand_built(
            &[0, 0, 0, 0],
            &[false, true, true, true],
            &[(0, 1), (1, 2), (2, 0)],
        );
        let clusters = vec![
            Cluster::new(Arc::clone(&arena), 0..3).unwrap(),
            Cluster::new(Arc::clone(&arena), [3]).unwrap(),
        ];
        let mut g = Graph::new(arena, clusters, None).unwrap();
        let err = g.torture_reference().unwrap_err();
        assert!(matches!(
            err,
            GraphError::InconsistentPeriodicity {
                ref sites,
                first: Periodicity::One,
                second: Periodicity::Isolated,
            } if sites == &vec![0]
        ));
        assert!(!g.is_tortured());
    }

    #[test]
    fn test_periodic_site_without_tortuosity_is_error() {
        // site 1 only appears as a halo node, so no search ever covers it
        let arena = hand_built(
            &[0, 0, 0, 1],
            &[false, true, true, true],
            &[(0, 1), (1, 2), (2, 0), (0, 3)],
        );
        let clusters = clusters_from_nodes(&arena);
        assert_eq!(clusters.len(), 1);
        let mut g = Graph::new(arena, clusters, None).unwrap();
        assert!(matches!(
            g.torture_reference(),
            Err(GraphError::MissingSiteTortuosity(1))
        ));
    }

    #[test]
    fn test_minimal_clusters_before_torture_is_error() {
        let g = graph(&chain(), 1.5);
        assert!(!g.is_tortured());
        assert!(matches!(g.minimal_clusters(), Err(GraphError::NotTortured)));
        assert!(g.site_tortuosity().is_none());
    }

    #[test]
    fn test_chain_reference_torture() {
        let mut g = graph(&chain(), 1.5);
        g.torture_reference().unwrap();

        let sites = g.site_tortuosity().unwrap();
        assert_eq!(sites, &BTreeMap::from([(0, 1), (1, 1)]));

        let minimal = g.minimal_clusters().unwrap();
        assert_eq!(minimal.len(), 2);
        assert_eq!(minimal[0].site_indices, vec![0]);
        assert_eq!(minimal[0].periodic, Periodicity::One);
        assert_eq!(minimal[0].tortuosity, Some(1.0));
        assert_eq!(g.return_frac_percolating(), 1.0);
    }

    #[test]
    fn test_isolated_sites_do_not_percolate() {
        let mut g = graph(&chain(), 0.5);
        g.torture_reference().unwrap();
        assert!(g.site_tortuosity().unwrap().is_empty());
        assert!(g.minimal_clusters().unwrap().iter().all(|m| m.tortuosity.is_none()));
        assert_eq!(g.return_frac_percolating(), 0.0);
    }

    #[test]
    fn test_empty_graph_fraction_is_zero() {
        let g = Graph::new(Arc::new(NodeArena::default()), Vec::new(), None).unwrap();
        assert_eq!(g.return_frac_percolating(), 0.0);
    }

    #[test]
    fn test_foreign_cluster_rejected() {
        let g = graph(&chain(), 1.5);
        let other = Arc::new(NodeArena::default());
        let result = Graph::new(other, g.clusters().to_vec(), None);
        assert!(matches!(result, Err(GraphError::Cluster(ClusterError::ForeignArena))));
    }

    #[test]
    fn test_periodic_structure_export() {
        let mut structure = chain();
        // isolated third site far from both chains
        structure.sites.push(Site::new("Li", [0.5, 0.25, 0.75]));
        let g = graph(&structure, 0.9);
        let set = g.cluster_site_sets(true);
        assert!(set.is_empty());
        assert_eq!(g.periodic_structure().unwrap().len(), 0);

        let g = graph(&structure, 1.5);
        assert_eq!(g.cluster_site_sets(false).len(), 3);
        assert_eq!(
            g.cluster_site_sets(true),
            BTreeSet::from([vec![0], vec![1], vec![2]])
        );
        assert_eq!(g.periodic_structure().unwrap().len(), 3);
        assert_eq!(g.cluster_structure(&[2]).unwrap().sites[0].coords, [0.5, 0.25, 0.75]);
    }

    #[test]
    fn test_export_without_structure() {
        let g = Graph::new(Arc::new(NodeArena::default()), Vec::new(), None).unwrap();
        assert!(matches!(g.periodic_structure(), Err(GraphError::NoStructure)));
    }

    #[test]
    fn test_auto_engine_reports_engine_used() {
        let mut g = graph(&chain(), 1.5);
        let used = g.torture_with_engine(EngineKind::Auto).unwrap();
        let expected = if AcceleratedBackend::is_available() {
            EngineKind::Accelerated
        } else {
            EngineKind::Reference
        };
        assert_eq!(used, expected);
        assert_eq!(g.site_tortuosity().unwrap().len(), 2);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_backend_released_after_torture() {
        let mut g = graph(&chain(), 1.5);
        let mut backend = AcceleratedBackend::new().unwrap();
        g.torture_with(&mut backend).unwrap();
        assert!(!backend.is_allocated());
        assert_eq!(g.site_tortuosity().unwrap(), &BTreeMap::from([(0, 1), (1, 1)]));
    }
}
