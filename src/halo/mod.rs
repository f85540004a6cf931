//! The 3×3×3 halo graph.
//!
//! Neighbour relations across periodic boundaries are resolved by
//! replicating the unit cell 27 times and wrapping replica coordinates
//! modulo 3. A connected component of the halo that contains several images
//! of the same site has closed on itself across the cell boundary.

pub mod builder;
pub mod shift;

pub use builder::{halo_nodes, unit_cell_edges, BuildError, HaloGraph, HaloGraphBuilder, UnitCellEdge};
pub use shift::{halo_index, replica_coords, replica_offset, shift, CENTRAL_REPLICA, HALO_IMAGES, REPLICAS_PER_AXIS};
