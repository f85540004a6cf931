//! Degree of periodicity of a cluster.

use serde::{Deserialize, Serialize};

/// How many independent lattice directions a cluster closes on itself along.
///
/// In the 3×3×3 halo a site's images inside one connected component form a
/// coset of a subgroup of Z₃³, so a component holds 1, 3, 9 or 27 images of
/// each of its sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Periodicity {
    /// Finite cluster (also used for any irregular image count).
    Isolated = 0,
    /// Percolates along one direction.
    One = 1,
    /// Percolates within a plane.
    Two = 2,
    /// Percolates in all three directions.
    Three = 3,
}

impl Periodicity {
    /// Classify from the number of images of one site found in a cluster.
    pub fn from_image_count(count: usize) -> Self {
        match count {
            27 => Self::Three,
            9 => Self::Two,
            3 => Self::One,
            _ => Self::Isolated,
        }
    }

    /// Whether `count` is one of the image counts a halo graph can produce.
    pub fn is_regular_image_count(count: usize) -> bool {
        matches!(count, 0 | 1 | 3 | 9 | 27)
    }

    /// Numeric degree, 0..=3.
    pub fn degree(self) -> u8 {
        self as u8
    }

    /// Whether the cluster percolates in at least one direction.
    pub fn is_periodic(self) -> bool {
        self != Self::Isolated
    }
}

impl From<Periodicity> for u8 {
    fn from(p: Periodicity) -> Self {
        p.degree()
    }
}

impl TryFrom<u8> for Periodicity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Isolated),
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            other => Err(format!("periodicity must be 0..=3, got {other}")),
        }
    }
}

impl std::fmt::Display for Periodicity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.degree())
    }
}
