//! Analysis configuration.
//!
//! ## Float Normalization for Deterministic Hashing
//!
//! The cutoff radius is quantized (multiplied by 1e6 and rounded to i64)
//! before hashing, so `params_hash` is stable across platforms and
//! serializer settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::canonical::{digest_hex, quantize};
use crate::CONFIG_VERSION;

/// Error type for invalid analysis parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Cutoff radius is not a positive finite number.
    #[error("Invalid cutoff radius: {0} (must be finite and > 0)")]
    InvalidCutoff(f64),
    /// No species were requested.
    #[error("Species set is empty")]
    NoSpecies,
}

/// Which tortuosity engine to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Sequential single-seed BFS. Always available.
    Reference,
    /// Parallel BFS over seeds. Fails if the crate was built without `parallel`.
    Accelerated,
    /// Accelerated when available, reference otherwise.
    Auto,
}

impl Default for EngineKind {
    fn default() -> Self {
        Self::Auto
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reference => write!(f, "reference"),
            Self::Accelerated => write!(f, "accelerated"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// Quantized parameters for deterministic hashing.
#[derive(Debug, Clone, Serialize)]
struct QuantizedParams<'a> {
    version: &'a str,
    cutoff: i64,
    species: &'a BTreeSet<String>,
}

/// Parameters of one percolation / tortuosity analysis.
///
/// ## Parameters
///
/// - `cutoff`: maximum site-site distance for two sites to be connected
/// - `species`: species symbols kept from the input structure
/// - `engine`: tortuosity engine selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Parameter schema version.
    pub version: String,
    /// Connection cutoff radius (same length unit as the lattice).
    pub cutoff: f64,
    /// Species symbols included in the graph.
    pub species: BTreeSet<String>,
    /// Tortuosity engine selection.
    #[serde(default)]
    pub engine: EngineKind,
}

impl AnalysisConfig {
    /// Create a config with the default engine selection.
    pub fn new<I, S>(cutoff: f64, species: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            version: CONFIG_VERSION.to_string(),
            cutoff,
            species: species.into_iter().map(Into::into).collect(),
            engine: EngineKind::default(),
        }
    }

    /// Select the tortuosity engine.
    pub fn with_engine(mut self, engine: EngineKind) -> Self {
        self.engine = engine;
        self
    }

    /// Check that the parameters describe a meaningful analysis.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.cutoff.is_finite() || self.cutoff <= 0.0 {
            return Err(ConfigError::InvalidCutoff(self.cutoff));
        }
        if self.species.is_empty() {
            return Err(ConfigError::NoSpecies);
        }
        Ok(())
    }

    /// Hash of the graph-defining parameters.
    ///
    /// The engine selection is excluded: both engines yield identical results.
    pub fn params_hash(&self) -> String {
        digest_hex(&QuantizedParams {
            version: &self.version,
            cutoff: quantize(self.cutoff),
            species: &self.species,
        })
    }
}
