//! End-to-end pipeline: structure → halo → clusters → graph → report.

use std::sync::Arc;
use tracing::{info, info_span};

use crate::cluster::{clusters_from_nodes, Cluster};
use crate::config::{AnalysisConfig, ConfigError};
use crate::graph::{Graph, GraphError};
use crate::halo::{BuildError, HaloGraphBuilder};
use crate::report::AnalysisReport;
use crate::structure::{Structure, StructureProvider};

/// Error type for the analysis pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Invalid parameters.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    /// Halo construction failed.
    #[error("Build error: {0}")]
    Build(#[from] BuildError),
    /// Aggregation or torture failed.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
    /// The structure provider failed to load.
    #[error("Structure provider error: {0}")]
    Provider(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Build the halo graph and split it into clusters.
pub fn clusters_from_structure(
    structure: &Structure,
    config: &AnalysisConfig,
) -> Result<Vec<Cluster>, AnalysisError> {
    Ok(graph_from_structure(structure, config)?.clusters().to_vec())
}

/// Build an untortured graph for `structure`.
pub fn graph_from_structure(
    structure: &Structure,
    config: &AnalysisConfig,
) -> Result<Graph, AnalysisError> {
    config.validate()?;
    let halo = HaloGraphBuilder::from_config(config).build(structure)?;

    let _span = info_span!("clusters", nodes = halo.arena.len()).entered();
    let arena = Arc::new(halo.arena);
    let clusters = clusters_from_nodes(&arena);
    Ok(Graph::new(arena, clusters, Some(Arc::new(halo.structure)))?)
}

/// Load a structure from `provider` and build an untortured graph.
pub fn graph_from_provider<P: StructureProvider>(
    provider: &P,
    config: &AnalysisConfig,
) -> Result<Graph, AnalysisError> {
    let structure = provider
        .load()
        .map_err(|e| AnalysisError::Provider(Box::new(e)))?;
    graph_from_structure(&structure, config)
}

/// Build, torture with the configured engine, and report.
pub fn analyze(structure: &Structure, config: &AnalysisConfig) -> Result<AnalysisReport, AnalysisError> {
    let mut graph = graph_from_structure(structure, config)?;
    let engine = graph.torture_with_engine(config.engine)?;
    let report = AnalysisReport::from_graph(&graph, config, engine)?;

    info!(
        params_hash = %report.params_hash,
        engine = %report.engine,
        sites = report.site_count,
        clusters = report.cluster_count(),
        frac_percolating = report.frac_percolating,
        fingerprint = %report.fingerprint,
        "Analysis complete"
    );
    Ok(report)
}
