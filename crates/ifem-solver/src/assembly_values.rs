//! Per-element shape data at quadrature points.
//!
//! Values depend only on the rest geometry and the element's quadrature
//! rule, so they are computed once and recomputed only when an element's
//! rule is refined.

use nalgebra::{DMatrix, DVector};

use crate::basis::ElementBasis;
use crate::error::{FemError, Result};
use crate::quadrature::Quadrature;

/// Shape values, physical gradients and volume factors of one element.
#[derive(Debug, Clone)]
pub struct ElementAssemblyValues {
    pub element: usize,
    pub quadrature: Quadrature,
    /// Shape values, `(n_points, n_bases)`
    pub val: DMatrix<f64>,
    /// Physical shape gradients per point, each `(n_bases, dim)`
    pub grad: Vec<DMatrix<f64>>,
    /// Geometric Jacobian determinant per point
    pub det: DVector<f64>,
    /// Inverse geometric Jacobian per point
    pub jac_inv: Vec<DMatrix<f64>>,
}

impl ElementAssemblyValues {
    /// Evaluate `basis` at its quadrature points through the geometric map
    /// of `geom_basis`.
    pub fn compute(basis: &ElementBasis, geom_basis: &ElementBasis) -> Result<Self> {
        let quadrature = basis.quadrature.clone();
        let points = &quadrature.points;
        let val = basis.values(points)?;
        let ref_grads = basis.gradients(points)?;
        let geom_grads = geom_basis.gradients(points)?;

        let n = quadrature.size();
        let mut grad = Vec::with_capacity(n);
        let mut det = DVector::zeros(n);
        let mut jac_inv = Vec::with_capacity(n);

        for q in 0..n {
            let jac = geom_basis.nodes.transpose() * &geom_grads[q];
            det[q] = jac.determinant();
            let inv = jac.try_inverse().ok_or(FemError::InvertedElement {
                element: basis.element,
                min_det: det[q],
            })?;
            grad.push(&ref_grads[q] * &inv);
            jac_inv.push(inv);
        }

        Ok(Self {
            element: basis.element,
            quadrature,
            val,
            grad,
            det,
            jac_inv,
        })
    }

    pub fn n_points(&self) -> usize {
        self.quadrature.size()
    }

    /// Physical integration weights `|det J_g| w_q`
    pub fn da(&self) -> DVector<f64> {
        self.det.abs().component_mul(&self.quadrature.weights)
    }

    /// Displacement gradient `∇u` at quadrature point `q`.
    pub fn displacement_gradient(&self, q: usize, local_u: &DMatrix<f64>) -> DMatrix<f64> {
        local_u.transpose() * &self.grad[q]
    }
}

/// Assembly values for every element of a discretization.
#[derive(Debug, Clone, Default)]
pub struct AssemblyValsCache {
    values: Vec<ElementAssemblyValues>,
}

impl AssemblyValsCache {
    pub fn new(bases: &[ElementBasis], geom_bases: &[ElementBasis]) -> Result<Self> {
        if bases.len() != geom_bases.len() {
            return Err(FemError::DimensionMismatch {
                expected: bases.len(),
                found: geom_bases.len(),
            });
        }
        let values = bases
            .iter()
            .zip(geom_bases)
            .map(|(b, g)| ElementAssemblyValues::compute(b, g))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { values })
    }

    pub fn get(&self, element: usize) -> &ElementAssemblyValues {
        &self.values[element]
    }

    /// Recompute one element after its quadrature rule changed.
    pub fn update(&mut self, element: usize, basis: &ElementBasis, geom_basis: &ElementBasis) -> Result<()> {
        self.values[element] = ElementAssemblyValues::compute(basis, geom_basis)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ElementAssemblyValues> {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::Discretization;
    use crate::mesh::Mesh;

    #[test]
    fn weights_integrate_element_volume() {
        let mesh = Mesh::box_mesh([1, 1, 1], [1.0, 2.0, 0.5]).unwrap();
        let disc = Discretization::build(&mesh, 2, 3).unwrap();
        let cache = AssemblyValsCache::new(&disc.bases, &disc.geom_bases).unwrap();
        assert_eq!(cache.len(), 6);
        let total: f64 = cache.iter().map(|v| v.da().sum()).sum();
        assert!((total - 1.0).abs() < 1e-12);
        for (e, v) in cache.iter().enumerate() {
            assert!((v.da().sum() - mesh.signed_volume(e)).abs() < 1e-12);
            assert!(v.det.iter().all(|&d| d > 0.0));
        }
    }

    #[test]
    fn physical_gradients_recover_linear_field() {
        let mesh = Mesh::rectangle(1, 1, 2.0, 3.0).unwrap();
        let disc = Discretization::build(&mesh, 1, 1).unwrap();
        let cache = AssemblyValsCache::new(&disc.bases, &disc.geom_bases).unwrap();
        // u = A x with A = [[0.1, 0.2], [0.3, 0.4]]
        let a = DMatrix::from_row_slice(2, 2, &[0.1, 0.2, 0.3, 0.4]);
        let x = DVector::from_fn(disc.n_dofs(), |i, _| {
            let (node, c) = (i / 2, i % 2);
            a[(c, 0)] * disc.nodes[(node, 0)] + a[(c, 1)] * disc.nodes[(node, 1)]
        });
        for basis in &disc.bases {
            let local = basis.local_coefficients(&x);
            let v = cache.get(basis.element);
            let g = v.displacement_gradient(0, &local);
            assert!((g - &a).norm() < 1e-12);
        }
    }
}
