//! Serializable analysis results.
//!
//! The report carries a fingerprint over the tortuosity results with floats
//! quantized, so two runs over the same structure and parameters produce the
//! same fingerprint regardless of which engine ran.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::canonical::{digest_hex, quantize};
use crate::config::{AnalysisConfig, EngineKind};
use crate::graph::{Graph, GraphError};
use crate::types::MinimalCluster;
use crate::CONFIG_VERSION;

/// Result of one percolation / tortuosity analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Schema version.
    pub version: String,
    /// Hash of the analysis parameters.
    pub params_hash: String,
    /// Engine that computed the tortuosities.
    pub engine: EngineKind,
    /// Number of unit-cell sites in the filtered structure.
    pub site_count: usize,
    /// Number of halo clusters (including translated copies).
    pub halo_cluster_count: usize,
    /// Fraction of unit-cell sites in periodic clusters.
    pub frac_percolating: f64,
    /// Tortuosity per site of periodic clusters.
    pub site_tortuosity: BTreeMap<usize, u32>,
    /// Unique clusters.
    pub minimal_clusters: Vec<MinimalCluster>,
    /// Deterministic hash of the results.
    pub fingerprint: String,
}

/// Fingerprint input.
#[derive(Serialize)]
struct FingerprintInput<'a> {
    version: &'a str,
    params_hash: &'a str,
    frac_percolating: i64,
    site_tortuosity: &'a BTreeMap<usize, u32>,
    clusters: Vec<(&'a [usize], u8, Option<i64>)>,
}

impl AnalysisReport {
    /// Build a report from a tortured graph.
    pub fn from_graph(
        graph: &Graph,
        config: &AnalysisConfig,
        engine: EngineKind,
    ) -> Result<Self, GraphError> {
        let site_tortuosity = graph.site_tortuosity().ok_or(GraphError::NotTortured)?.clone();
        let minimal_clusters = graph.minimal_clusters()?.to_vec();
        let params_hash = config.params_hash();
        let frac_percolating = graph.return_frac_percolating();

        let fingerprint = digest_hex(&FingerprintInput {
            version: CONFIG_VERSION,
            params_hash: &params_hash,
            frac_percolating: quantize(frac_percolating),
            site_tortuosity: &site_tortuosity,
            clusters: minimal_clusters
                .iter()
                .map(|m| (m.site_indices.as_slice(), m.periodic.degree(), m.tortuosity.map(quantize)))
                .collect(),
        });

        Ok(Self {
            version: CONFIG_VERSION.to_string(),
            params_hash,
            engine,
            site_count: graph.arena().site_count(),
            halo_cluster_count: graph.clusters().len(),
            frac_percolating,
            site_tortuosity,
            minimal_clusters,
            fingerprint,
        })
    }

    /// Number of unique clusters.
    pub fn cluster_count(&self) -> usize {
        self.minimal_clusters.len()
    }

    /// Number of unique periodic clusters.
    pub fn periodic_cluster_count(&self) -> usize {
        self.minimal_clusters.iter().filter(|m| m.periodic.is_periodic()).count()
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a report from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
