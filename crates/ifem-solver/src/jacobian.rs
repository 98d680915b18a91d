//! Jacobian determinants of the geometric and deformed element maps.
//!
//! [`evaluate_jacobian`] samples determinants at discrete points.
//! [`JacobianField`] describes the total map Jacobian of one element along a
//! linear displacement path,
//!
//! ```text
//! J(ξ, t) = J_g(ξ) + ∇_ξ u0(ξ) + t (∇_ξ u1(ξ) - ∇_ξ u0(ξ))
//! ```
//!
//! For Lagrange orders up to 2 every entry is affine in ξ and affine in t,
//! so it is stored exactly by its values at the reference corners. Entry
//! ranges over a sub-simplex times a time interval are then attained at the
//! corner/endpoint combinations, which gives a rigorous (up to rounding)
//! interval enclosure of the determinant.

use nalgebra::{DMatrix, DVector, Matrix3};

use crate::basis::ElementBasis;
use crate::error::{FemError, Result};
use crate::interval::Interval;
use crate::refinement::SubSimplex;

/// Relative padding applied to determinant enclosures to absorb rounding.
pub const ENCLOSURE_REL_EPS: f64 = 1e-10;

/// Minimum geometric and deformed determinants over `points`.
///
/// Both minima are seeded at 1. The geometric value is `det F · det J_g`;
/// it reduces to `det J_g` when the displacement vanishes.
///
/// # Arguments
/// * `basis` - Displacement basis of the element
/// * `geom_basis` - Geometric basis of the element
/// * `points` - Reference points, one row each
/// * `displacement` - Global displacement vector
///
/// # Returns
/// `(min_geometric_det, min_deformed_det)`
pub fn evaluate_jacobian(
    basis: &ElementBasis,
    geom_basis: &ElementBasis,
    points: &DMatrix<f64>,
    displacement: &DVector<f64>,
) -> Result<(f64, f64)> {
    let dim = basis.dim.value();
    let local_u = basis.local_coefficients(displacement);
    let grads = basis.gradients(points)?;
    let geom_grads = geom_basis.gradients(points)?;

    let mut min_geometric = 1.0f64;
    let mut min_deformed = 1.0f64;
    for q in 0..points.nrows() {
        let jac = geom_basis.nodes.transpose() * &geom_grads[q];
        let ref_grad_u = local_u.transpose() * &grads[q];
        match jac.clone().try_inverse() {
            Some(jac_inv) => {
                let f = DMatrix::identity(dim, dim) + ref_grad_u * &jac_inv;
                let det_f = f.determinant();
                min_deformed = min_deformed.min(det_f);
                min_geometric = min_geometric.min(det_f / jac_inv.determinant());
            }
            None => {
                min_deformed = f64::NEG_INFINITY;
                min_geometric = min_geometric.min(0.0);
            }
        }
    }
    Ok((min_geometric, min_deformed))
}

/// Total map Jacobian of one element along `x(t) = x0 + t (x1 - x0)`.
///
/// Planar elements are padded to 3x3 with a unit `(2, 2)` entry, which
/// leaves the determinant unchanged.
#[derive(Debug, Clone)]
pub struct JacobianField {
    pub element: usize,
    dim: usize,
    /// `J(ξ_k, 0)` at every reference corner `ξ_k`
    base: Vec<Matrix3<f64>>,
    /// `∂J/∂t` at every reference corner
    rate: Vec<Matrix3<f64>>,
    /// `1 / det J_g` at the element centroid
    scale: f64,
    /// `det J_g^(-1/dim)`, makes entry spreads independent of element size
    entry_scale: f64,
}

impl JacobianField {
    pub fn new(
        basis: &ElementBasis,
        geom_basis: &ElementBasis,
        x0: &DVector<f64>,
        x1: &DVector<f64>,
    ) -> Result<Self> {
        for order in [basis.order, geom_basis.order] {
            if order > 2 {
                return Err(FemError::UnsupportedOrder(order));
            }
        }
        let dim = basis.dim.value();
        let corners = basis.dim.reference_vertices();
        let grads = basis.gradients(&corners)?;
        let geom_grads = geom_basis.gradients(&corners)?;
        let u0 = basis.local_coefficients(x0);
        let u1 = basis.local_coefficients(x1);

        let pad = |m: &DMatrix<f64>, diagonal: f64| {
            let mut out = Matrix3::zeros();
            out[(2, 2)] = diagonal;
            for r in 0..dim {
                for c in 0..dim {
                    out[(r, c)] = m[(r, c)];
                }
            }
            out
        };

        let mut base = Vec::with_capacity(corners.nrows());
        let mut rate = Vec::with_capacity(corners.nrows());
        for k in 0..corners.nrows() {
            let jac = geom_basis.nodes.transpose() * &geom_grads[k];
            let g0 = u0.transpose() * &grads[k];
            let g1 = u1.transpose() * &grads[k];
            base.push(pad(&(jac + &g0), 1.0));
            rate.push(pad(&(g1 - g0), 0.0));
        }

        let centroid = DMatrix::from_element(1, dim, 1.0 / (dim + 1) as f64);
        let jac_c = geom_basis.nodes.transpose() * &geom_basis.gradients(&centroid)?[0];
        let rest_det = jac_c.determinant();
        if !(rest_det > 0.0) || !rest_det.is_finite() {
            return Err(FemError::InvertedElement {
                element: basis.element,
                min_det: rest_det,
            });
        }

        Ok(Self {
            element: basis.element,
            dim,
            base,
            rate,
            scale: 1.0 / rest_det,
            entry_scale: rest_det.powf(-1.0 / dim as f64),
        })
    }

    /// Barycentric weights of a reference point
    fn weights(&self, point: &[f64]) -> Vec<f64> {
        let mut w = Vec::with_capacity(self.dim + 1);
        w.push(1.0 - point.iter().sum::<f64>());
        w.extend_from_slice(point);
        w
    }

    fn matrix_at(&self, point: &[f64], t: f64) -> Matrix3<f64> {
        self.weights(point)
            .iter()
            .zip(self.base.iter().zip(&self.rate))
            .fold(Matrix3::zeros(), |acc, (&w, (a, b))| acc + (a + b * t) * w)
    }

    /// Normalized deformed determinant `det J(ξ, t) / det J_g`.
    pub fn determinant(&self, point: &[f64], t: f64) -> f64 {
        self.matrix_at(point, t).determinant() * self.scale
    }

    /// Corner matrices `(J(c, 0), ∂J/∂t)` of a sub-simplex
    fn corner_matrices(&self, simplex: &SubSimplex) -> Vec<(Matrix3<f64>, Matrix3<f64>)> {
        (0..simplex.corners.nrows())
            .map(|r| {
                let point: Vec<f64> = simplex.corners.row(r).iter().copied().collect();
                let w = self.weights(&point);
                w.iter().zip(self.base.iter().zip(&self.rate)).fold(
                    (Matrix3::zeros(), Matrix3::zeros()),
                    |(a_acc, b_acc), (&wk, (a, b))| (a_acc + a * wk, b_acc + b * wk),
                )
            })
            .collect()
    }

    /// Smallest normalized determinant over the corners and the centroid
    /// of `simplex` at time `t`.
    pub fn min_sample(&self, simplex: &SubSimplex, t: f64) -> f64 {
        let centroid: Vec<f64> = simplex.centroid().iter().copied().collect();
        (0..simplex.corners.nrows())
            .map(|r| {
                let point: Vec<f64> = simplex.corners.row(r).iter().copied().collect();
                self.determinant(&point, t)
            })
            .fold(self.determinant(&centroid, t), f64::min)
    }

    /// Interval enclosure of the normalized determinant over
    /// `simplex × [t0, t1]`, widened by [`ENCLOSURE_REL_EPS`].
    pub fn enclosure(&self, simplex: &SubSimplex, t0: f64, t1: f64) -> Interval {
        let corners = self.corner_matrices(simplex);
        let entry = |r: usize, c: usize| {
            let values = corners
                .iter()
                .flat_map(|(a, b)| [a[(r, c)] + b[(r, c)] * t0, a[(r, c)] + b[(r, c)] * t1]);
            Interval::hull(values).unwrap_or(Interval::point(f64::NAN))
        };
        let det = match self.dim {
            2 => Interval::det2(&[[entry(0, 0), entry(0, 1)], [entry(1, 0), entry(1, 1)]]),
            _ => Interval::det3(&[
                [entry(0, 0), entry(0, 1), entry(0, 2)],
                [entry(1, 0), entry(1, 1), entry(1, 2)],
                [entry(2, 0), entry(2, 1), entry(2, 2)],
            ]),
        };
        Interval::new(det.lo * self.scale, det.hi * self.scale).widen(ENCLOSURE_REL_EPS)
    }

    /// Largest variation of any entry across the corners of `simplex` at a
    /// fixed time in `[t0, t1]`.
    pub fn spatial_spread(&self, simplex: &SubSimplex, t0: f64, t1: f64) -> f64 {
        let corners = self.corner_matrices(simplex);
        let mut spread = 0.0f64;
        for t in [t0, t1] {
            for r in 0..self.dim {
                for c in 0..self.dim {
                    let values = corners.iter().map(|(a, b)| a[(r, c)] + b[(r, c)] * t);
                    if let Some(range) = Interval::hull(values) {
                        spread = spread.max(range.width());
                    }
                }
            }
        }
        spread * self.entry_scale
    }

    /// Largest variation of any entry over `[t0, t1]` at a fixed corner.
    pub fn temporal_spread(&self, simplex: &SubSimplex, t0: f64, t1: f64) -> f64 {
        let corners = self.corner_matrices(simplex);
        let mut rate = 0.0f64;
        for (_, b) in &corners {
            for r in 0..self.dim {
                for c in 0..self.dim {
                    rate = rate.max(b[(r, c)].abs());
                }
            }
        }
        rate * (t1 - t0) * self.entry_scale
    }
}
