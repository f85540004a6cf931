//! Halo graph construction.
//!
//! ## Algorithm
//!
//! 1. Filter the structure to the requested species and wrap coordinates
//!    into the unit cell; site order defines `uc_index`
//! 2. Search every lattice translation that can bring a site image within
//!    the cutoff and record unit-cell edges `(i, j, image)`
//! 3. Project each unit-cell edge onto all 27 replicas with [`shift`]
//! 4. Materialize one [`Node`] per halo position

use nalgebra::Vector3;
use std::collections::BTreeSet;
use tracing::{debug, info_span, warn};

use super::shift::{halo_index, shift, CENTRAL_REPLICA, HALO_IMAGES};
use crate::config::{AnalysisConfig, ConfigError};
use crate::structure::{Structure, StructureError};
use crate::types::{Node, NodeArena};

/// Distances at or below this are a site meeting itself.
const ZERO_DISTANCE: f64 = 1e-8;

/// Extra reach added to the cutoff when sizing the image search.
const IMAGE_SEARCH_PADDING: f64 = 0.15;

/// Error type for halo graph construction.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Invalid builder parameters.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// Structure could not be prepared (e.g. missing species).
    #[error("Structure error: {0}")]
    Structure(#[from] StructureError),
}

/// A connection between two unit-cell sites.
///
/// Site `to` displaced by lattice translation `image` lies within the cutoff
/// of site `from`.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitCellEdge {
    /// Source site.
    pub from: usize,
    /// Target site.
    pub to: usize,
    /// Lattice translation applied to the target.
    pub image: [i64; 3],
    /// Cartesian distance.
    pub distance: f64,
}

/// Output of the builder.
#[derive(Debug, Clone)]
pub struct HaloGraph {
    /// The 27 × sites halo nodes.
    pub arena: NodeArena,
    /// Unit-cell edges the halo was projected from.
    pub edges: Vec<UnitCellEdge>,
    /// Filtered, wrapped structure; site `i` has `uc_index` i.
    pub structure: Structure,
}

/// Turns a structure into a halo graph.
#[derive(Debug, Clone)]
pub struct HaloGraphBuilder {
    cutoff: f64,
    species: BTreeSet<String>,
}

impl HaloGraphBuilder {
    /// Create a builder.
    pub fn new<I, S>(cutoff: f64, species: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cutoff,
            species: species.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a builder from analysis parameters.
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            cutoff: config.cutoff,
            species: config.species.clone(),
        }
    }

    /// Cutoff radius.
    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    /// Filter the structure to the builder's species and build the halo graph.
    pub fn build(&self, structure: &Structure) -> Result<HaloGraph, BuildError> {
        if self.species.is_empty() {
            return Err(ConfigError::NoSpecies.into());
        }
        let filtered = structure.filter(&self.species)?;
        debug!(
            input_sites = structure.len(),
            kept_sites = filtered.len(),
            species = ?self.species,
            "Filtered structure"
        );
        self.build_unfiltered(&filtered)
    }

    /// Build the halo graph from every site of `structure`.
    pub fn build_unfiltered(&self, structure: &Structure) -> Result<HaloGraph, BuildError> {
        if !self.cutoff.is_finite() || self.cutoff <= 0.0 {
            return Err(ConfigError::InvalidCutoff(self.cutoff).into());
        }
        let _span = info_span!("build_halo", sites = structure.len(), cutoff = self.cutoff).entered();

        let structure = structure.wrapped();
        let edges = unit_cell_edges(&structure, self.cutoff);
        let arena = halo_nodes(&structure, &edges);

        debug!(
            unit_cell_edges = edges.len(),
            halo_nodes = arena.len(),
            "Built halo graph"
        );
        Ok(HaloGraph {
            arena,
            edges,
            structure,
        })
    }
}

/// Find all unit-cell edges within `cutoff`.
///
/// Coordinates are expected to be wrapped into [0, 1).
pub fn unit_cell_edges(structure: &Structure, cutoff: f64) -> Vec<UnitCellEdge> {
    let lattice = &structure.lattice;
    let reach = lattice
        .reciprocal_lengths()
        .map(|r| ((cutoff + IMAGE_SEARCH_PADDING) * r).ceil() as i64);

    let frac: Vec<Vector3<f64>> = structure.sites.iter().map(|s| s.frac()).collect();
    let cart: Vec<Vector3<f64>> = frac.iter().map(|f| lattice.to_cartesian(f)).collect();

    let mut edges = Vec::new();
    let mut wrapping_edges = 0usize;

    for nx in -reach.x..=reach.x {
        for ny in -reach.y..=reach.y {
            for nz in -reach.z..=reach.z {
                let image = [nx, ny, nz];
                let translation = Vector3::new(nx as f64, ny as f64, nz as f64);
                for (j, frac_j) in frac.iter().enumerate() {
                    let image_pos = lattice.to_cartesian(&(frac_j + translation));
                    for (i, cart_i) in cart.iter().enumerate() {
                        let distance = (image_pos - cart_i).norm();
                        if distance > ZERO_DISTANCE && distance <= cutoff {
                            if image.iter().any(|c| c.abs() > 1) {
                                wrapping_edges += 1;
                            }
                            edges.push(UnitCellEdge {
                                from: i,
                                to: j,
                                image,
                                distance,
                            });
                        }
                    }
                }
            }
        }
    }

    if wrapping_edges > 0 {
        warn!(
            wrapping_edges,
            cutoff,
            "Cutoff reaches beyond neighbouring cells; halo images wrap modulo 3"
        );
    }
    edges.sort_by(|a, b| (a.from, a.to, a.image).cmp(&(b.from, b.to, b.image)));
    edges
}

/// Materialize the 27-replica node arena for `edges`.
pub fn halo_nodes(structure: &Structure, edges: &[UnitCellEdge]) -> NodeArena {
    let total = structure.len() * HALO_IMAGES;
    let mut nodes: Vec<Node> = (0..total)
        .map(|index| {
            let uc_index = index / HALO_IMAGES;
            Node::new(
                index,
                structure.sites[uc_index].species.clone(),
                uc_index,
                index % HALO_IMAGES != CENTRAL_REPLICA,
            )
        })
        .collect();

    let mut self_loops = 0usize;
    for edge in edges {
        for offset in 0..HALO_IMAGES {
            let a = halo_index(edge.from, offset);
            let b = shift(halo_index(edge.to, offset), edge.image);
            if a == b {
                self_loops += 1;
                continue;
            }
            // both directions, so symmetry never depends on float rounding
            nodes[a].neighbours.insert(b);
            nodes[b].neighbours.insert(a);
        }
    }
    if self_loops > 0 {
        debug!(self_loops, "Dropped halo self-loops");
    }

    NodeArena::from_nodes_unchecked(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{Lattice, Site};
    use proptest::prelude::*;

    fn chain() -> Structure {
        // two parallel chains along a, far apart in b and c
        Structure::new(
            Lattice::orthorhombic(1.0, 10.0, 10.0).unwrap(),
            vec![Site::new("Li", [0.0, 0.0, 0.0]), Site::new("Li", [0.0, 0.5, 0.5])],
        )
    }

    #[test]
    fn test_node_count_and_halo_flags() {
        let halo = HaloGraphBuilder::new(1.5, ["Li"]).build(&chain()).unwrap();
        assert_eq!(halo.arena.len(), 2 * HALO_IMAGES);
        let central: Vec<usize> = halo.arena.unit_cell_nodes().map(|n| n.index).collect();
        assert_eq!(central, vec![13, 27 + 13]);
        assert!(halo.arena.iter().all(|n| n.uc_index == n.index / HALO_IMAGES));
    }

    #[test]
    fn test_chain_edges_are_own_images() {
        let halo = HaloGraphBuilder::new(1.5, ["Li"]).build(&chain()).unwrap();
        assert_eq!(halo.edges.len(), 4);
        for edge in &halo.edges {
            assert_eq!(edge.from, edge.to);
            assert_eq!(edge.image[0].abs(), 1);
            assert!((edge.distance - 1.0).abs() < 1e-12);
        }
        // central image of site 0 links to its x-neighbours (0,1,1) and (2,1,1)
        let centre = halo.arena.get(13).unwrap();
        assert_eq!(centre.neighbours, [4, 22].into_iter().collect());
    }

    #[test]
    fn test_halo_is_symmetric() {
        let halo = HaloGraphBuilder::new(1.5, ["Li"]).build(&chain()).unwrap();
        assert!(halo.arena.is_symmetric());
    }

    #[test]
    fn test_small_cutoff_leaves_isolated_nodes() {
        let halo = HaloGraphBuilder::new(0.5, ["Li"]).build(&chain()).unwrap();
        assert!(halo.edges.is_empty());
        assert!(halo.arena.iter().all(|n| n.neighbours.is_empty()));
    }

    #[test]
    fn test_missing_species_is_configuration_error() {
        let result = HaloGraphBuilder::new(1.5, ["Li", "Mg"]).build(&chain());
        assert!(matches!(
            result,
            Err(BuildError::Structure(StructureError::MissingSpecies(_)))
        ));
    }

    #[test]
    fn test_invalid_cutoff_rejected() {
        let result = HaloGraphBuilder::new(-1.0, ["Li"]).build(&chain());
        assert!(matches!(result, Err(BuildError::Config(ConfigError::InvalidCutoff(_)))));
    }

    #[test]
    fn test_species_filter_assigns_dense_uc_indices() {
        let mut structure = chain();
        structure.sites.insert(0, Site::new("O", [0.5, 0.5, 0.0]));
        let halo = HaloGraphBuilder::new(1.5, ["Li"]).build(&structure).unwrap();
        assert_eq!(halo.structure.len(), 2);
        assert_eq!(halo.arena.site_count(), 2);
        assert!(halo.arena.iter().all(|n| n.element == "Li"));
    }

    fn arb_structure() -> impl Strategy<Value = Structure> {
        (
            3.0f64..6.0,
            3.0f64..6.0,
            3.0f64..6.0,
            prop::collection::vec(prop::array::uniform3(0.0f64..1.0), 1..5),
        )
            .prop_map(|(a, b, c, coords)| {
                Structure::new(
                    Lattice::orthorhombic(a, b, c).unwrap(),
                    coords.into_iter().map(|f| Site::new("Li", f)).collect(),
                )
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_neighbour_relation_is_symmetric(structure in arb_structure(), cutoff in 1.0f64..4.0) {
            let halo = HaloGraphBuilder::new(cutoff, ["Li"]).build(&structure).unwrap();
            prop_assert!(halo.arena.is_symmetric());
            prop_assert_eq!(halo.arena.len(), structure.len() * HALO_IMAGES);
            prop_assert!(halo.arena.iter().all(|n| !n.neighbours.contains(&n.index)));
        }
    }
}
