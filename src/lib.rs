//! # crystal-torture
//!
//! Percolation and tortuosity analysis of crystal site networks.
//!
//! Given a periodic structure, a cutoff radius and a set of species, the
//! crate answers two questions:
//!
//! > Which connected clusters of sites percolate through the crystal, and
//! > how direct are their conduction paths?
//!
//! ## Pipeline
//!
//! ```text
//! Structure → HaloGraphBuilder → NodeArena → clusters_from_nodes → Graph
//!                                                                    ↓
//!                                              TortuosityEngine (reference | accelerated)
//!                                                                    ↓
//!                                               site tortuosity, MinimalCluster, AnalysisReport
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Site order of the filtered structure defines `uc_index`
//! - Halo node `27 * uc_index + 9x + 3y + z` is replica (x, y, z)
//! - Reference and accelerated engines return identical tortuosities
//! - Same structure + same parameters → identical report fingerprint

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod canonical;
pub mod cluster;
pub mod config;
pub mod graph;
pub mod halo;
pub mod logging;
pub mod report;
pub mod structure;
pub mod tortuosity;
pub mod types;

// Re-exports
pub use analysis::{analyze, clusters_from_structure, graph_from_provider, graph_from_structure, AnalysisError};
pub use cluster::{clusters_from_nodes, Cluster, ClusterError};
pub use config::{AnalysisConfig, ConfigError, EngineKind};
pub use graph::{Graph, GraphError};
pub use halo::{shift, BuildError, HaloGraph, HaloGraphBuilder};
pub use report::AnalysisReport;
pub use structure::{JsonStructureFile, Lattice, Site, Structure, StructureError, StructureProvider};
pub use tortuosity::{AcceleratedBackend, EngineError, ReferenceEngine, SharedBackend, TortuosityEngine};
pub use types::{MinimalCluster, Node, NodeArena, Periodicity};

/// Version of the analysis parameter and report schema.
pub const CONFIG_VERSION: &str = "crystal_torture_v1";
