//! Element kernels and global assembly for elastic energies.
//!
//! ## Assembly Process
//!
//! 1. Split the elements into contiguous ranges, one per worker
//! 2. For every element of a range:
//!    - Evaluate `∇u` at each quadrature point from cached shape gradients
//!    - Evaluate the constitutive law
//!    - Accumulate `Bᵀ P` (gradient) or `Bᵀ C B` (Hessian) weighted by `da`
//! 3. Sum the per-worker accumulators on the calling thread
//!
//! `B` maps the local nodal displacements (ordered `j * dim + a`) to the
//! row-major entries of `∇u`. Global dof of local `(j, a)` is
//! `global[j] * dim + a`.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use nalgebra_sparse::CsrMatrix;
use rayon::ThreadPool;

use crate::assembly_values::{AssemblyValsCache, ElementAssemblyValues};
use crate::basis::ElementBasis;
use crate::constitutive::{ConstitutiveLaw, law_for};
use crate::dimension::Dimension;
use crate::error::{FemError, Result};
use crate::materials::{LameParameters, MaterialLibrary, MaterialModel};
use crate::parallel::map_reduce;
use crate::quadrature::quadrature_order;
use crate::sparse_cache::{SparseMatrixCache, Triplet};

/// Elastic energy assembler for one material model with per-element
/// parameters.
#[derive(Debug)]
pub struct ElasticAssembler {
    dim: Dimension,
    model: MaterialModel,
    law: Box<dyn ConstitutiveLaw>,
    params: Vec<LameParameters>,
    densities: Vec<f64>,
}

impl ElasticAssembler {
    /// # Arguments
    /// * `dim` - Spatial dimension
    /// * `model` - Constitutive model shared by all elements
    /// * `params` - Lamé parameters per element
    /// * `densities` - Mass density per element (for body forces)
    pub fn new(
        dim: Dimension,
        model: MaterialModel,
        params: Vec<LameParameters>,
        densities: Vec<f64>,
    ) -> Result<Self> {
        if params.len() != densities.len() {
            return Err(FemError::DimensionMismatch {
                expected: params.len(),
                found: densities.len(),
            });
        }
        Ok(Self {
            dim,
            model,
            law: law_for(model),
            params,
            densities,
        })
    }

    /// Assembler for elements `0..n_elements` of a material library
    pub fn from_library(dim: Dimension, library: &MaterialLibrary, n_elements: usize) -> Result<Self> {
        Self::new(
            dim,
            library.model(n_elements)?,
            library.element_parameters(n_elements)?,
            library.element_densities(n_elements)?,
        )
    }

    pub fn dim(&self) -> Dimension {
        self.dim
    }

    pub fn model(&self) -> MaterialModel {
        self.model
    }

    pub fn is_linear(&self) -> bool {
        self.law.is_linear()
    }

    pub fn n_elements(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[LameParameters] {
        &self.params
    }

    /// Quadrature order needed by this material for a given basis order
    pub fn quadrature_order(&self, basis_order: usize) -> usize {
        quadrature_order(self.model, basis_order)
    }

    /// Strain-displacement matrix at quadrature point `q`, `(dim², n_bases·dim)`.
    fn b_matrix(&self, vals: &ElementAssemblyValues, q: usize) -> DMatrix<f64> {
        let d = self.dim.value();
        let grad = &vals.grad[q];
        let mut b = DMatrix::zeros(d * d, grad.nrows() * d);
        for j in 0..grad.nrows() {
            for a in 0..d {
                for c in 0..d {
                    // ∂(∇u)_ac / ∂u_(j,a) = ∂N_j/∂x_c
                    b[(a * d + c, j * d + a)] = grad[(j, c)];
                }
            }
        }
        b
    }

    fn flatten(m: &DMatrix<f64>) -> DVector<f64> {
        let d = m.nrows();
        DVector::from_fn(d * m.ncols(), |i, _| m[(i / d, i % d)])
    }

    /// Elastic energy of one element
    pub fn element_energy(
        &self,
        vals: &ElementAssemblyValues,
        basis: &ElementBasis,
        x: &DVector<f64>,
    ) -> f64 {
        let local = basis.local_coefficients(x);
        let params = &self.params[vals.element];
        let da = vals.da();
        (0..vals.n_points())
            .map(|q| self.law.energy_density(&vals.displacement_gradient(q, &local), params) * da[q])
            .sum()
    }

    /// Local gradient of the element energy, length `n_bases · dim`
    pub fn element_gradient(
        &self,
        vals: &ElementAssemblyValues,
        basis: &ElementBasis,
        x: &DVector<f64>,
    ) -> DVector<f64> {
        let local = basis.local_coefficients(x);
        let params = &self.params[vals.element];
        let da = vals.da();
        let mut f = DVector::zeros(basis.n_bases() * self.dim.value());
        for q in 0..vals.n_points() {
            let stress = self.law.stress(&vals.displacement_gradient(q, &local), params);
            f += self.b_matrix(vals, q).transpose() * Self::flatten(&stress) * da[q];
        }
        f
    }

    /// Local Hessian of the element energy
    pub fn element_hessian(
        &self,
        vals: &ElementAssemblyValues,
        basis: &ElementBasis,
        x: &DVector<f64>,
    ) -> DMatrix<f64> {
        let local = basis.local_coefficients(x);
        let params = &self.params[vals.element];
        let da = vals.da();
        let n = basis.n_bases() * self.dim.value();
        let mut k = DMatrix::zeros(n, n);
        for q in 0..vals.n_points() {
            let tangent = self
                .law
                .stress_derivative(&vals.displacement_gradient(q, &local), params);
            let b = self.b_matrix(vals, q);
            k += b.transpose() * tangent * b * da[q];
        }
        k
    }

    fn global_dofs(&self, basis: &ElementBasis) -> Vec<usize> {
        let d = self.dim.value();
        basis
            .global
            .iter()
            .flat_map(|&g| (0..d).map(move |a| g * d + a))
            .collect()
    }

    /// Total elastic energy
    pub fn assemble_energy(
        &self,
        pool: &ThreadPool,
        cache: &AssemblyValsCache,
        bases: &[ElementBasis],
        x: &DVector<f64>,
    ) -> f64 {
        map_reduce(pool, bases.len(), || 0.0, |acc, e| {
            *acc += self.element_energy(cache.get(e), &bases[e], x);
        })
        .into_iter()
        .sum()
    }

    /// Elastic energy of every element
    pub fn assemble_energy_per_element(
        &self,
        pool: &ThreadPool,
        cache: &AssemblyValsCache,
        bases: &[ElementBasis],
        x: &DVector<f64>,
    ) -> DVector<f64> {
        let mut out = DVector::zeros(bases.len());
        let parts = map_reduce(pool, bases.len(), Vec::new, |acc: &mut Vec<(usize, f64)>, e| {
            acc.push((e, self.element_energy(cache.get(e), &bases[e], x)));
        });
        for (e, v) in parts.into_iter().flatten() {
            out[e] = v;
        }
        out
    }

    /// Gradient of the total energy, length `n_bases · dim`
    pub fn assemble_gradient(
        &self,
        pool: &ThreadPool,
        cache: &AssemblyValsCache,
        bases: &[ElementBasis],
        n_bases: usize,
        x: &DVector<f64>,
    ) -> DVector<f64> {
        let n_dofs = n_bases * self.dim.value();
        map_reduce(
            pool,
            bases.len(),
            || DVector::zeros(n_dofs),
            |acc: &mut DVector<f64>, e| {
                let local = self.element_gradient(cache.get(e), &bases[e], x);
                for (i, g) in self.global_dofs(&bases[e]).into_iter().enumerate() {
                    acc[g] += local[i];
                }
            },
        )
        .into_iter()
        .fold(DVector::zeros(n_dofs), |sum, part| sum + part)
    }

    /// Sparse Hessian of the total energy.
    ///
    /// With `project`, every element block is projected onto the positive
    /// semi-definite cone before accumulation.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble_hessian(
        &self,
        pool: &ThreadPool,
        cache: &AssemblyValsCache,
        bases: &[ElementBasis],
        n_bases: usize,
        x: &DVector<f64>,
        project: bool,
        mat_cache: &mut SparseMatrixCache,
    ) -> Result<CsrMatrix<f64>> {
        let n_dofs = n_bases * self.dim.value();
        let blocks = map_reduce(pool, bases.len(), Vec::new, |acc: &mut Vec<Triplet>, e| {
            let mut k = self.element_hessian(cache.get(e), &bases[e], x);
            if project {
                k = project_to_psd(&k);
            }
            let dofs = self.global_dofs(&bases[e]);
            for (i, &gi) in dofs.iter().enumerate() {
                for (j, &gj) in dofs.iter().enumerate() {
                    acc.push((gi, gj, k[(i, j)]));
                }
            }
        });
        mat_cache.assemble(n_dofs, &blocks)
    }

    /// Consistent nodal forces of a uniform body acceleration `g` times density.
    pub fn assemble_body_force(
        &self,
        cache: &AssemblyValsCache,
        bases: &[ElementBasis],
        n_bases: usize,
        gravity: &[f64],
    ) -> Result<DVector<f64>> {
        let d = self.dim.value();
        if gravity.len() != d {
            return Err(FemError::DimensionMismatch {
                expected: d,
                found: gravity.len(),
            });
        }
        let mut f = DVector::zeros(n_bases * d);
        for (e, basis) in bases.iter().enumerate() {
            let vals = cache.get(e);
            let da = vals.da();
            let rho = self.densities[e];
            for q in 0..vals.n_points() {
                for (j, &g) in basis.global.iter().enumerate() {
                    let w = rho * vals.val[(q, j)] * da[q];
                    for a in 0..d {
                        f[g * d + a] += w * gravity[a];
                    }
                }
            }
        }
        Ok(f)
    }

    /// Sensitivity of the adjoint-weighted elastic force to the Lamé
    /// parameters of each element.
    ///
    /// Entry `e` is `-∫ ∂P/∂λ : ∇p` and entry `e + n_elements` is
    /// `-∫ ∂P/∂μ : ∇p` over element `e`.
    pub fn force_material_derivative(
        &self,
        pool: &ThreadPool,
        cache: &AssemblyValsCache,
        bases: &[ElementBasis],
        x: &DVector<f64>,
        adjoint: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        if x.len() != adjoint.len() {
            return Err(FemError::DimensionMismatch {
                expected: x.len(),
                found: adjoint.len(),
            });
        }
        let n = bases.len();
        let parts = map_reduce(pool, n, Vec::new, |acc: &mut Vec<(usize, f64, f64)>, e| {
            let vals = cache.get(e);
            let local_u = bases[e].local_coefficients(x);
            let local_p = bases[e].local_coefficients(adjoint);
            let params = &self.params[e];
            let da = vals.da();
            let (mut d_lambda, mut d_mu) = (0.0, 0.0);
            for q in 0..vals.n_points() {
                let grad_u = vals.displacement_gradient(q, &local_u);
                let grad_p = vals.displacement_gradient(q, &local_p);
                let (dp_lambda, dp_mu) = self.law.stress_parameter_derivatives(&grad_u, params);
                d_lambda -= dp_lambda.dot(&grad_p) * da[q];
                d_mu -= dp_mu.dot(&grad_p) * da[q];
            }
            acc.push((e, d_lambda, d_mu));
        });

        let mut out = DVector::zeros(2 * n);
        for (e, d_lambda, d_mu) in parts.into_iter().flatten() {
            out[e] = d_lambda;
            out[e + n] = d_mu;
        }
        Ok(out)
    }

    /// Sensitivity of the adjoint-weighted elastic force to the rest
    /// positions of the geometric vertices, length `n_vertices · dim`.
    ///
    /// Moving vertex `i` along axis `c` is the velocity field `v = φ_i e_c`
    /// of the geometric basis; its entry is
    /// `-∫ (C : (∇u ∇v) + P (∇v - tr(∇v) I)ᵀ) : ∇p` over the elements
    /// sharing the vertex.
    #[allow(clippy::too_many_arguments)]
    pub fn force_shape_derivative(
        &self,
        pool: &ThreadPool,
        cache: &AssemblyValsCache,
        bases: &[ElementBasis],
        geom_bases: &[ElementBasis],
        n_vertices: usize,
        x: &DVector<f64>,
        adjoint: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        if x.len() != adjoint.len() {
            return Err(FemError::DimensionMismatch {
                expected: x.len(),
                found: adjoint.len(),
            });
        }
        if bases.len() != geom_bases.len() {
            return Err(FemError::DimensionMismatch {
                expected: bases.len(),
                found: geom_bases.len(),
            });
        }
        if let Some(&g) = geom_bases
            .iter()
            .flat_map(|b| b.global.iter())
            .find(|&&g| g >= n_vertices)
        {
            return Err(FemError::InvalidMesh(format!(
                "geometric node {g} but only {n_vertices} vertices"
            )));
        }

        let size = n_vertices * self.dim.value();
        let parts = map_reduce(
            pool,
            bases.len(),
            || Ok(DVector::zeros(size)),
            |acc: &mut Result<DVector<f64>>, e| {
                let Ok(term) = acc.as_mut() else {
                    return;
                };
                if let Err(err) =
                    self.add_element_shape_derivative(cache.get(e), &bases[e], &geom_bases[e], x, adjoint, term)
                {
                    *acc = Err(err);
                }
            },
        );
        let mut total = DVector::zeros(size);
        for part in parts {
            total += part?;
        }
        Ok(total)
    }

    fn add_element_shape_derivative(
        &self,
        vals: &ElementAssemblyValues,
        basis: &ElementBasis,
        geom_basis: &ElementBasis,
        x: &DVector<f64>,
        adjoint: &DVector<f64>,
        term: &mut DVector<f64>,
    ) -> Result<()> {
        let d = self.dim.value();
        let local_u = basis.local_coefficients(x);
        let local_p = basis.local_coefficients(adjoint);
        let params = &self.params[vals.element];
        let da = vals.da();
        let geom_grads = geom_basis.gradients(&vals.quadrature.points)?;

        for q in 0..vals.n_points() {
            let grad_u = vals.displacement_gradient(q, &local_u);
            let grad_p = vals.displacement_gradient(q, &local_p);
            let flat_p = Self::flatten(&grad_p);
            let stress = self.law.stress(&grad_u, params);
            let tangent = self.law.stress_derivative(&grad_u, params);
            // physical gradients of the geometric shape functions, (n_vertices, dim)
            let grad_phi = &geom_grads[q] * &vals.jac_inv[q];

            for (i, &vertex) in geom_basis.global.iter().enumerate() {
                for c in 0..d {
                    let mut grad_v = DMatrix::zeros(d, d);
                    for k in 0..d {
                        grad_v[(c, k)] = grad_phi[(i, k)];
                    }
                    let stress_change = &tangent * Self::flatten(&(&grad_u * &grad_v));

                    let mut volume_change = grad_v.clone();
                    let trace = grad_v.trace();
                    for k in 0..d {
                        volume_change[(k, k)] -= trace;
                    }
                    let transported = &stress * volume_change.transpose();

                    let integrand = stress_change.dot(&flat_p) + transported.dot(&grad_p);
                    term[vertex * d + c] -= integrand * da[q];
                }
            }
        }
        Ok(())
    }
}

/// Nearest symmetric positive semi-definite matrix (negative eigenvalues
/// clamped to zero).
pub fn project_to_psd(m: &DMatrix<f64>) -> DMatrix<f64> {
    let sym = (m + m.transpose()) * 0.5;
    let mut eig = SymmetricEigen::new(sym);
    if eig.eigenvalues.iter().all(|&l| l >= 0.0) {
        return eig.recompose();
    }
    eig.eigenvalues.iter_mut().for_each(|l| *l = l.max(0.0));
    eig.recompose()
}
