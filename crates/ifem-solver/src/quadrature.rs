//! Quadrature rules on the reference triangle and tetrahedron.
//!
//! [`simplex_quadrature`] returns a symmetric base rule by polynomial
//! exactness order. [`refine_quadrature`] turns it into a composite rule over
//! the leaves of a [`SubdivisionTree`], which is how elements near inversion
//! receive a denser integration rule.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::dimension::Dimension;
use crate::error::{FemError, Result};
use crate::materials::MaterialModel;
use crate::refinement::SubdivisionTree;

/// Points (rows, reference coordinates) and weights of a quadrature rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Quadrature {
    pub points: DMatrix<f64>,
    pub weights: DVector<f64>,
}

impl Quadrature {
    /// Number of integration points
    pub fn size(&self) -> usize {
        self.weights.len()
    }

    pub fn dim(&self) -> usize {
        self.points.ncols()
    }

    /// Sum of the weights; equals the reference measure for a valid rule
    pub fn total_weight(&self) -> f64 {
        self.weights.sum()
    }

    fn from_rows(dim: usize, rows: &[(Vec<f64>, f64)]) -> Self {
        let points = DMatrix::from_fn(rows.len(), dim, |r, c| rows[r].0[c]);
        let weights = DVector::from_iterator(rows.len(), rows.iter().map(|(_, w)| *w));
        Self { points, weights }
    }
}

/// Quadrature order used for element assembly.
///
/// Linear elasticity integrates products of gradients exactly
/// (`2(p - 1)`); hyperelastic models get one extra degree.
pub fn quadrature_order(model: MaterialModel, basis_order: usize) -> usize {
    let p = basis_order as isize;
    let order = match model {
        MaterialModel::LinearElastic => 2 * (p - 1),
        MaterialModel::NeoHookean => 2 * p - 1,
    };
    order.max(1) as usize
}

/// Symmetric rule on the reference simplex exact up to `order`.
///
/// # Arguments
/// * `dim` - Triangle or tetrahedron
/// * `order` - Requested polynomial exactness (0 to 5)
///
/// # Returns
/// The cheapest tabulated rule of at least the requested order.
pub fn simplex_quadrature(dim: Dimension, order: usize) -> Result<Quadrature> {
    let rows = match (dim, order) {
        (Dimension::Two, 0..=1) => vec![(vec![1.0 / 3.0, 1.0 / 3.0], 0.5)],
        (Dimension::Two, 2) => {
            let w = 1.0 / 6.0;
            vec![
                (vec![1.0 / 6.0, 1.0 / 6.0], w),
                (vec![2.0 / 3.0, 1.0 / 6.0], w),
                (vec![1.0 / 6.0, 2.0 / 3.0], w),
            ]
        }
        (Dimension::Two, 3..=4) => {
            let mut rows = tri_orbit(0.445948490915965, 0.223381589678011 / 2.0);
            rows.extend(tri_orbit(0.091576213509771, 0.109951743655322 / 2.0));
            rows
        }
        (Dimension::Two, 5) => {
            let mut rows = vec![(vec![1.0 / 3.0, 1.0 / 3.0], 0.225 / 2.0)];
            rows.extend(tri_orbit(0.470142064105115, 0.132394152788506 / 2.0));
            rows.extend(tri_orbit(0.101286507323456, 0.125939180544827 / 2.0));
            rows
        }
        (Dimension::Three, 0..=1) => vec![(vec![0.25, 0.25, 0.25], 1.0 / 6.0)],
        (Dimension::Three, 2) => {
            let a = 0.585410196624968;
            let b = 0.138196601125011;
            let w = 1.0 / 24.0;
            vec![
                (vec![b, b, b], w),
                (vec![a, b, b], w),
                (vec![b, a, b], w),
                (vec![b, b, a], w),
            ]
        }
        (Dimension::Three, 3..=5) => {
            let mut rows = tet_orbit_31(0.0927352503108912, 0.01224884051939366);
            rows.extend(tet_orbit_31(0.3108859192633006, 0.01878132095300264));
            rows.extend(tet_orbit_22(0.4544962958743504, 0.007091003462846911));
            rows
        }
        _ => {
            return Err(FemError::UnsupportedQuadratureOrder {
                dim: dim.value(),
                order,
            });
        }
    };
    Ok(Quadrature::from_rows(dim.value(), &rows))
}

/// Three points with barycentric weights (a, a, 1 - 2a) and permutations.
fn tri_orbit(a: f64, w: f64) -> Vec<(Vec<f64>, f64)> {
    let b = 1.0 - 2.0 * a;
    vec![(vec![a, a], w), (vec![b, a], w), (vec![a, b], w)]
}

/// Four points with barycentric weights (a, a, a, 1 - 3a) and permutations.
fn tet_orbit_31(a: f64, w: f64) -> Vec<(Vec<f64>, f64)> {
    let b = 1.0 - 3.0 * a;
    vec![
        (vec![a, a, a], w),
        (vec![b, a, a], w),
        (vec![a, b, a], w),
        (vec![a, a, b], w),
    ]
}

/// Six points with barycentric weights (a, a, b, b), b = 1/2 - a.
fn tet_orbit_22(a: f64, w: f64) -> Vec<(Vec<f64>, f64)> {
    let b = 0.5 - a;
    vec![
        (vec![b, a, a], w),
        (vec![a, b, a], w),
        (vec![a, a, b], w),
        (vec![b, b, a], w),
        (vec![b, a, b], w),
        (vec![a, b, b], w),
    ]
}

/// Composite rule placing a copy of the base rule in every leaf of `tree`.
///
/// Leaf weights are scaled by `2^(-dim * level)`, so the total weight is
/// unchanged by refinement.
pub fn refine_quadrature(
    tree: &SubdivisionTree,
    dim: Dimension,
    order: usize,
) -> Result<Quadrature> {
    if tree.dim() != dim {
        return Err(FemError::DimensionMismatch {
            expected: dim.value(),
            found: tree.dim().value(),
        });
    }

    let base = simplex_quadrature(dim, order)?;
    if !tree.has_children() {
        return Ok(base);
    }

    let leaves = tree.leaves();
    let n = base.size();
    let mut points = DMatrix::zeros(n * leaves.len(), dim.value());
    let mut weights = DVector::zeros(n * leaves.len());

    for (k, leaf) in leaves.iter().enumerate() {
        let mapped = leaf.map_points(&base.points);
        let scale = leaf.volume_ratio(dim);
        points.rows_mut(k * n, n).copy_from(&mapped);
        weights.rows_mut(k * n, n).copy_from(&(&base.weights * scale));
    }

    let refined = Quadrature { points, weights };
    debug_assert!(
        (refined.total_weight() - base.total_weight()).abs() <= 1e-8 * base.total_weight(),
        "refined weights sum to {} instead of {}",
        refined.total_weight(),
        base.total_weight()
    );
    debug!(
        leaves = leaves.len(),
        depth = tree.depth(),
        points = refined.size(),
        "refined quadrature"
    );
    Ok(refined)
}
