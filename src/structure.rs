//! Crystal structure input: lattice, sites and structure providers.
//!
//! The analysis core only needs lattice vectors, species symbols and
//! fractional coordinates. File-format parsing lives outside this crate;
//! [`JsonStructureFile`] reads the crate's own serde representation.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Determinants below this magnitude are treated as a degenerate cell.
const SINGULAR_DETERMINANT: f64 = 1e-12;

/// Error type for structure operations.
#[derive(Debug, thiserror::Error)]
pub enum StructureError {
    /// Lattice vectors are linearly dependent.
    #[error("Lattice is singular (determinant {0:e})")]
    SingularLattice(f64),
    /// Requested species are not present in the structure.
    #[error("Requested species not present in structure: {}", .0.join(", "))]
    MissingSpecies(Vec<String>),
    /// Site index outside the structure.
    #[error("Site index {index} out of range for structure with {len} sites")]
    SiteOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of sites.
        len: usize,
    },
    /// Reading a structure file failed.
    #[error("Failed to read structure file: {0}")]
    Io(#[from] std::io::Error),
    /// Structure file is not valid JSON for [`Structure`].
    #[error("Failed to parse structure file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Periodic lattice.
///
/// Rows of the matrix are the lattice vectors a, b, c. Cartesian
/// coordinates are `frac[0] * a + frac[1] * b + frac[2] * c`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[[f64; 3]; 3]", into = "[[f64; 3]; 3]")]
pub struct Lattice {
    matrix: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl Lattice {
    /// Create a lattice from its three vectors.
    pub fn new(vectors: [[f64; 3]; 3]) -> Result<Self, StructureError> {
        let flat: Vec<f64> = vectors.iter().flatten().copied().collect();
        let matrix = Matrix3::from_row_slice(&flat);
        let det = matrix.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_DETERMINANT {
            return Err(StructureError::SingularLattice(det));
        }
        let inverse = matrix
            .try_inverse()
            .ok_or(StructureError::SingularLattice(det))?;
        Ok(Self { matrix, inverse })
    }

    /// Orthorhombic lattice with edge lengths `a`, `b`, `c`.
    pub fn orthorhombic(a: f64, b: f64, c: f64) -> Result<Self, StructureError> {
        Self::new([[a, 0.0, 0.0], [0.0, b, 0.0], [0.0, 0.0, c]])
    }

    /// Cubic lattice with edge length `a`.
    pub fn cubic(a: f64) -> Result<Self, StructureError> {
        Self::orthorhombic(a, a, a)
    }

    /// Lattice vectors as matrix rows.
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Convert fractional to cartesian coordinates.
    pub fn to_cartesian(&self, frac: &Vector3<f64>) -> Vector3<f64> {
        self.matrix.transpose() * frac
    }

    /// Convert cartesian to fractional coordinates.
    pub fn to_fractional(&self, cart: &Vector3<f64>) -> Vector3<f64> {
        self.inverse.transpose() * cart
    }

    /// Lengths of the reciprocal lattice vectors, without the 2π factor.
    ///
    /// The inverse of each length is the spacing between lattice planes
    /// along that axis.
    pub fn reciprocal_lengths(&self) -> Vector3<f64> {
        Vector3::new(
            self.inverse.column(0).norm(),
            self.inverse.column(1).norm(),
            self.inverse.column(2).norm(),
        )
    }

    /// Cell volume.
    pub fn volume(&self) -> f64 {
        self.matrix.determinant().abs()
    }
}

impl TryFrom<[[f64; 3]; 3]> for Lattice {
    type Error = StructureError;

    fn try_from(vectors: [[f64; 3]; 3]) -> Result<Self, Self::Error> {
        Self::new(vectors)
    }
}

impl From<Lattice> for [[f64; 3]; 3] {
    fn from(lattice: Lattice) -> Self {
        let m = lattice.matrix;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ]
    }
}

/// One crystallographic site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Species symbol.
    pub species: String,
    /// Fractional coordinates.
    pub coords: [f64; 3],
    /// Optional free-form label (e.g. Wyckoff position).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Site {
    /// Create a site from fractional coordinates.
    pub fn new(species: impl Into<String>, coords: [f64; 3]) -> Self {
        Self {
            species: species.into(),
            coords,
            label: None,
        }
    }

    /// Create a site from cartesian coordinates.
    pub fn from_cartesian(species: impl Into<String>, cart: [f64; 3], lattice: &Lattice) -> Self {
        let frac = lattice.to_fractional(&Vector3::from(cart));
        Self::new(species, [frac.x, frac.y, frac.z])
    }

    /// Attach a label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Fractional coordinates as a vector.
    pub fn frac(&self) -> Vector3<f64> {
        Vector3::from(self.coords)
    }
}

/// A periodic structure: lattice plus ordered sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    /// Periodic lattice.
    pub lattice: Lattice,
    /// Sites in input order.
    pub sites: Vec<Site>,
}

impl Structure {
    /// Create a structure.
    pub fn new(lattice: Lattice, sites: Vec<Site>) -> Self {
        Self { lattice, sites }
    }

    /// Number of sites.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Whether the structure has no sites.
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Distinct species symbols present.
    pub fn species_set(&self) -> BTreeSet<String> {
        self.sites.iter().map(|s| s.species.clone()).collect()
    }

    /// Keep only sites whose species is in `allowed`.
    ///
    /// Every requested species must be present in the input; otherwise the
    /// analysis would silently describe a different sublattice.
    pub fn filter(&self, allowed: &BTreeSet<String>) -> Result<Self, StructureError> {
        let present = self.species_set();
        let missing: Vec<String> = allowed.difference(&present).cloned().collect();
        if !missing.is_empty() {
            return Err(StructureError::MissingSpecies(missing));
        }

        let sites = self
            .sites
            .iter()
            .filter(|s| allowed.contains(&s.species))
            .cloned()
            .collect();
        Ok(Self::new(self.lattice.clone(), sites))
    }

    /// Copy with all fractional coordinates folded into [0, 1).
    pub fn wrapped(&self) -> Self {
        let sites = self
            .sites
            .iter()
            .map(|s| {
                let mut site = s.clone();
                for c in site.coords.iter_mut() {
                    *c = c.rem_euclid(1.0);
                    // rem_euclid can round up to exactly 1.0 for tiny negatives
                    if *c >= 1.0 {
                        *c = 0.0;
                    }
                }
                site
            })
            .collect();
        Self::new(self.lattice.clone(), sites)
    }

    /// Structure containing only the given sites, in ascending index order.
    pub fn subset<'a, I>(&self, indices: I) -> Result<Self, StructureError>
    where
        I: IntoIterator<Item = &'a usize>,
    {
        let ordered: BTreeSet<usize> = indices.into_iter().copied().collect();
        let sites = ordered
            .into_iter()
            .map(|index| self.site(index).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(self.lattice.clone(), sites))
    }

    /// Site by index.
    pub fn site(&self, index: usize) -> Result<&Site, StructureError> {
        self.sites.get(index).ok_or(StructureError::SiteOutOfRange {
            index,
            len: self.sites.len(),
        })
    }

    /// Cartesian coordinates of a site.
    pub fn cartesian(&self, index: usize) -> Result<Vector3<f64>, StructureError> {
        Ok(self.lattice.to_cartesian(&self.site(index)?.frac()))
    }

    /// Minimum-image distance between two sites.
    pub fn periodic_distance(&self, i: usize, j: usize) -> Result<f64, StructureError> {
        let mut diff = self.site(j)?.frac() - self.site(i)?.frac();
        diff.apply(|d| {
            let nearest = d.round();
            *d -= nearest;
        });

        // Rounding to the nearest image is exact only for orthogonal cells;
        // scan the neighbouring images for skewed ones.
        let mut best = f64::INFINITY;
        for x in -1..=1 {
            for y in -1..=1 {
                for z in -1..=1 {
                    let shifted = diff + Vector3::new(x as f64, y as f64, z as f64);
                    best = best.min(self.lattice.to_cartesian(&shifted).norm());
                }
            }
        }
        Ok(best)
    }
}

/// Source of structure data.
///
/// Implementations load a full structure; species filtering happens in the
/// analysis pipeline.
pub trait StructureProvider {
    /// Error type for load failures.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the structure.
    fn load(&self) -> Result<Structure, Self::Error>;
}

impl StructureProvider for Structure {
    type Error = std::convert::Infallible;

    fn load(&self) -> Result<Structure, Self::Error> {
        Ok(self.clone())
    }
}

/// Structure stored as a JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonStructureFile {
    path: PathBuf,
}

impl JsonStructureFile {
    /// Create a provider for the given path.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Write a structure to `path` in the format this provider reads.
    pub fn write(path: impl AsRef<Path>, structure: &Structure) -> Result<(), StructureError> {
        let bytes = serde_json::to_vec_pretty(structure)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

impl StructureProvider for JsonStructureFile {
    type Error = StructureError;

    fn load(&self) -> Result<Structure, Self::Error> {
        let bytes = std::fs::read(&self.path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
