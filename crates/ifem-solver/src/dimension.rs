//! Runtime dimension tag for triangle (2D) and tetrahedron (3D) meshes.
//!
//! All simplex machinery (subdivision tables, quadrature rules, Lagrange
//! bases) is written once and dispatches on this tag instead of being
//! duplicated per element kind.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::FemError;

/// Spatial dimension of a simplicial mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum Dimension {
    /// Triangles
    Two,
    /// Tetrahedra
    Three,
}

impl Dimension {
    /// Numeric dimension (2 or 3)
    pub fn value(self) -> usize {
        match self {
            Dimension::Two => 2,
            Dimension::Three => 3,
        }
    }

    /// Number of simplex corners
    pub fn n_vertices(self) -> usize {
        self.value() + 1
    }

    /// Number of children produced by one red refinement step
    pub fn n_children(self) -> usize {
        match self {
            Dimension::Two => 4,
            Dimension::Three => 8,
        }
    }

    /// Measure of the reference simplex (1/2 or 1/6)
    pub fn reference_volume(self) -> f64 {
        match self {
            Dimension::Two => 0.5,
            Dimension::Three => 1.0 / 6.0,
        }
    }

    /// Corners of the reference simplex, one row per corner.
    pub fn reference_vertices(self) -> DMatrix<f64> {
        let dim = self.value();
        let mut vertices = DMatrix::zeros(dim + 1, dim);
        for d in 0..dim {
            vertices[(d + 1, d)] = 1.0;
        }
        vertices
    }
}

impl TryFrom<usize> for Dimension {
    type Error = FemError;

    fn try_from(dim: usize) -> Result<Self, Self::Error> {
        match dim {
            2 => Ok(Dimension::Two),
            3 => Ok(Dimension::Three),
            other => Err(FemError::InvalidConfig(format!(
                "dimension must be 2 or 3, got {other}"
            ))),
        }
    }
}

impl From<Dimension> for usize {
    fn from(dim: Dimension) -> Self {
        dim.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_counts_follow_red_refinement() {
        assert_eq!(Dimension::Two.n_children(), 4);
        assert_eq!(Dimension::Three.n_children(), 8);
        assert_eq!(Dimension::Three.n_vertices(), 4);
    }

    #[test]
    fn reference_vertices_span_unit_simplex() {
        let v = Dimension::Three.reference_vertices();
        assert_eq!(v.nrows(), 4);
        assert_eq!(v[(0, 0)], 0.0);
        assert_eq!(v[(1, 0)], 1.0);
        assert_eq!(v[(3, 2)], 1.0);
    }

    #[test]
    fn rejects_unsupported_dimension() {
        assert!(Dimension::try_from(1).is_err());
        assert_eq!(Dimension::try_from(2).unwrap(), Dimension::Two);
    }
}
