//! Deduplicated cluster descriptor.

use serde::{Deserialize, Serialize};

use super::periodicity::Periodicity;

/// One unique connected component of the unit cell.
///
/// The halo replicates each true cluster up to 27 times; a minimal cluster
/// collapses those copies to the set of unit-cell sites they cover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimalCluster {
    /// Unit-cell site indices, ascending.
    pub site_indices: Vec<usize>,
    /// Number of unit-cell sites.
    pub size: usize,
    /// Degree of periodicity.
    pub periodic: Periodicity,
    /// Mean site tortuosity; `None` for non-periodic clusters.
    pub tortuosity: Option<f64>,
}

impl MinimalCluster {
    /// Create a descriptor from ascending site indices.
    pub fn new(site_indices: Vec<usize>, periodic: Periodicity, tortuosity: Option<f64>) -> Self {
        debug_assert!(site_indices.windows(2).all(|w| w[0] < w[1]));
        Self {
            size: site_indices.len(),
            site_indices,
            periodic,
            tortuosity,
        }
    }

    /// Whether the site belongs to this cluster.
    pub fn contains_site(&self, uc_index: usize) -> bool {
        self.site_indices.binary_search(&uc_index).is_ok()
    }
}
