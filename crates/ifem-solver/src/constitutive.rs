//! Constitutive laws evaluated on the physical displacement gradient.
//!
//! Every law works in 2D and 3D. Fourth-order tangents are stored as
//! `(dim², dim²)` matrices with row index `i * dim + j` for stress entry
//! `(i, j)` and column index `k * dim + l` for gradient entry `(k, l)`.

use std::fmt::Debug;

use nalgebra::DMatrix;

use crate::materials::{LameParameters, MaterialModel};

/// Energy density and its derivatives as functions of `∇u`.
pub trait ConstitutiveLaw: Send + Sync + Debug {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// True if the stress is linear in `∇u`
    fn is_linear(&self) -> bool;

    /// Strain energy density ψ(∇u)
    fn energy_density(&self, grad_u: &DMatrix<f64>, params: &LameParameters) -> f64;

    /// Stress conjugate to `∇u` (first Piola-Kirchhoff, or Cauchy for small strain)
    fn stress(&self, grad_u: &DMatrix<f64>, params: &LameParameters) -> DMatrix<f64>;

    /// Tangent `∂P/∂(∇u)`
    fn stress_derivative(&self, grad_u: &DMatrix<f64>, params: &LameParameters) -> DMatrix<f64>;

    /// `(∂P/∂λ, ∂P/∂μ)` at fixed `∇u`
    fn stress_parameter_derivatives(
        &self,
        grad_u: &DMatrix<f64>,
        params: &LameParameters,
    ) -> (DMatrix<f64>, DMatrix<f64>);
}

/// Boxed law for a material model
pub fn law_for(model: MaterialModel) -> Box<dyn ConstitutiveLaw> {
    match model {
        MaterialModel::LinearElastic => Box::new(LinearElasticity),
        MaterialModel::NeoHookean => Box::new(NeoHookean),
    }
}

#[inline]
fn delta(a: usize, b: usize) -> f64 {
    if a == b { 1.0 } else { 0.0 }
}

fn small_strain(grad_u: &DMatrix<f64>) -> DMatrix<f64> {
    (grad_u + grad_u.transpose()) * 0.5
}

/// Small-strain isotropic elasticity, ψ = μ ε:ε + λ/2 (tr ε)²
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearElasticity;

impl ConstitutiveLaw for LinearElasticity {
    fn name(&self) -> &'static str {
        "LinearElasticity"
    }

    fn is_linear(&self) -> bool {
        true
    }

    fn energy_density(&self, grad_u: &DMatrix<f64>, params: &LameParameters) -> f64 {
        let eps = small_strain(grad_u);
        let tr = eps.trace();
        params.mu * eps.component_mul(&eps).sum() + 0.5 * params.lambda * tr * tr
    }

    fn stress(&self, grad_u: &DMatrix<f64>, params: &LameParameters) -> DMatrix<f64> {
        let dim = grad_u.nrows();
        let eps = small_strain(grad_u);
        let tr = eps.trace();
        eps * (2.0 * params.mu) + DMatrix::identity(dim, dim) * (params.lambda * tr)
    }

    fn stress_derivative(&self, grad_u: &DMatrix<f64>, params: &LameParameters) -> DMatrix<f64> {
        let d = grad_u.nrows();
        let (mu, lambda) = (params.mu, params.lambda);
        DMatrix::from_fn(d * d, d * d, |row, col| {
            let (i, j) = (row / d, row % d);
            let (k, l) = (col / d, col % d);
            mu * (delta(i, k) * delta(j, l) + delta(i, l) * delta(j, k))
                + lambda * delta(i, j) * delta(k, l)
        })
    }

    fn stress_parameter_derivatives(
        &self,
        grad_u: &DMatrix<f64>,
        _params: &LameParameters,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        let dim = grad_u.nrows();
        let eps = small_strain(grad_u);
        let tr = eps.trace();
        (DMatrix::identity(dim, dim) * tr, eps * 2.0)
    }
}

/// Compressible neo-Hookean solid,
/// ψ = μ/2 (tr FᵀF - d) - μ ln J + λ/2 (ln J)².
///
/// The energy is `+∞` and the stress `NaN` for `J <= 0`, so inverted
/// configurations are rejected by the line search.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeoHookean;

impl NeoHookean {
    /// F, J and F⁻¹, or `None` when F is singular or inverted
    fn kinematics(grad_u: &DMatrix<f64>) -> (DMatrix<f64>, f64, Option<DMatrix<f64>>) {
        let dim = grad_u.nrows();
        let f = grad_u + DMatrix::identity(dim, dim);
        let j = f.determinant();
        let f_inv = if j > 0.0 { f.clone().try_inverse() } else { None };
        (f, j, f_inv)
    }
}

impl ConstitutiveLaw for NeoHookean {
    fn name(&self) -> &'static str {
        "NeoHookean"
    }

    fn is_linear(&self) -> bool {
        false
    }

    fn energy_density(&self, grad_u: &DMatrix<f64>, params: &LameParameters) -> f64 {
        let dim = grad_u.nrows() as f64;
        let (f, j, _) = Self::kinematics(grad_u);
        if !(j > 0.0) {
            return f64::INFINITY;
        }
        let log_j = j.ln();
        0.5 * params.mu * (f.norm_squared() - dim) - params.mu * log_j
            + 0.5 * params.lambda * log_j * log_j
    }

    fn stress(&self, grad_u: &DMatrix<f64>, params: &LameParameters) -> DMatrix<f64> {
        let dim = grad_u.nrows();
        let (f, j, f_inv) = Self::kinematics(grad_u);
        let Some(f_inv) = f_inv else {
            return DMatrix::from_element(dim, dim, f64::NAN);
        };
        let f_inv_t = f_inv.transpose();
        let log_j = j.ln();
        (f - &f_inv_t) * params.mu + f_inv_t * (params.lambda * log_j)
    }

    fn stress_derivative(&self, grad_u: &DMatrix<f64>, params: &LameParameters) -> DMatrix<f64> {
        let d = grad_u.nrows();
        let (_, j, f_inv) = Self::kinematics(grad_u);
        let Some(g) = f_inv else {
            return DMatrix::from_element(d * d, d * d, f64::NAN);
        };
        let (mu, lambda) = (params.mu, params.lambda);
        let log_j = j.ln();
        DMatrix::from_fn(d * d, d * d, |row, col| {
            let (i, jj) = (row / d, row % d);
            let (k, l) = (col / d, col % d);
            mu * delta(i, k) * delta(jj, l)
                + (mu - lambda * log_j) * g[(l, i)] * g[(jj, k)]
                + lambda * g[(jj, i)] * g[(l, k)]
        })
    }

    fn stress_parameter_derivatives(
        &self,
        grad_u: &DMatrix<f64>,
        _params: &LameParameters,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        let dim = grad_u.nrows();
        let (f, j, f_inv) = Self::kinematics(grad_u);
        let Some(f_inv) = f_inv else {
            let nan = DMatrix::from_element(dim, dim, f64::NAN);
            return (nan.clone(), nan);
        };
        let f_inv_t = f_inv.transpose();
        (&f_inv_t * j.ln(), f - f_inv_t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> LameParameters {
        LameParameters {
            lambda: 1.7,
            mu: 0.9,
        }
    }

    fn sample_gradient(dim: usize) -> DMatrix<f64> {
        let values = [0.12, -0.05, 0.03, 0.08, -0.1, 0.02, -0.04, 0.06, 0.15];
        DMatrix::from_fn(dim, dim, |i, j| values[i * 3 + j])
    }

    fn check_stress_is_energy_gradient(law: &dyn ConstitutiveLaw, dim: usize) {
        let grad = sample_gradient(dim);
        let p = law.stress(&grad, &params());
        let h = 1e-6;
        for i in 0..dim {
            for j in 0..dim {
                let mut plus = grad.clone();
                let mut minus = grad.clone();
                plus[(i, j)] += h;
                minus[(i, j)] -= h;
                let fd = (law.energy_density(&plus, &params())
                    - law.energy_density(&minus, &params()))
                    / (2.0 * h);
                assert!(
                    (fd - p[(i, j)]).abs() < 1e-7,
                    "{} {dim}D P[{i},{j}]: fd {fd} vs {}",
                    law.name(),
                    p[(i, j)]
                );
            }
        }
    }

    fn check_tangent_is_stress_gradient(law: &dyn ConstitutiveLaw, dim: usize) {
        let grad = sample_gradient(dim);
        let c = law.stress_derivative(&grad, &params());
        let h = 1e-6;
        for k in 0..dim {
            for l in 0..dim {
                let mut plus = grad.clone();
                let mut minus = grad.clone();
                plus[(k, l)] += h;
                minus[(k, l)] -= h;
                let fd = (law.stress(&plus, &params()) - law.stress(&minus, &params())) / (2.0 * h);
                for i in 0..dim {
                    for j in 0..dim {
                        let exact = c[(i * dim + j, k * dim + l)];
                        assert!(
                            (fd[(i, j)] - exact).abs() < 1e-6,
                            "{} dP[{i},{j}]/dF[{k},{l}]",
                            law.name()
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn stresses_are_energy_gradients() {
        for dim in [2, 3] {
            check_stress_is_energy_gradient(&LinearElasticity, dim);
            check_stress_is_energy_gradient(&NeoHookean, dim);
        }
    }

    #[test]
    fn tangents_are_stress_gradients() {
        for dim in [2, 3] {
            check_tangent_is_stress_gradient(&LinearElasticity, dim);
            check_tangent_is_stress_gradient(&NeoHookean, dim);
        }
    }

    #[test]
    fn parameter_derivatives_match_finite_differences() {
        let h = 1e-6;
        for law in [law_for(MaterialModel::LinearElastic), law_for(MaterialModel::NeoHookean)] {
            let grad = sample_gradient(3);
            let (d_lambda, d_mu) = law.stress_parameter_derivatives(&grad, &params());
            let base = params();
            let shifted = |dl: f64, dm: f64| LameParameters {
                lambda: base.lambda + dl,
                mu: base.mu + dm,
            };
            let fd_lambda = (law.stress(&grad, &shifted(h, 0.0))
                - law.stress(&grad, &shifted(-h, 0.0)))
                / (2.0 * h);
            let fd_mu = (law.stress(&grad, &shifted(0.0, h)) - law.stress(&grad, &shifted(0.0, -h)))
                / (2.0 * h);
            assert!((fd_lambda - d_lambda).norm() < 1e-7, "{}", law.name());
            assert!((fd_mu - d_mu).norm() < 1e-7, "{}", law.name());
        }
    }

    #[test]
    fn neo_hookean_is_stress_free_at_rest() {
        let zero = DMatrix::zeros(3, 3);
        assert!(NeoHookean.energy_density(&zero, &params()).abs() < 1e-14);
        assert!(NeoHookean.stress(&zero, &params()).norm() < 1e-14);
    }

    #[test]
    fn neo_hookean_rejects_inverted_gradient() {
        // F = diag(-1, 1)
        let grad = DMatrix::from_row_slice(2, 2, &[-2.0, 0.0, 0.0, 0.0]);
        assert_eq!(NeoHookean.energy_density(&grad, &params()), f64::INFINITY);
        assert!(NeoHookean.stress(&grad, &params()).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn tangents_agree_at_rest() {
        // linearization of neo-Hookean at F = I is linear elasticity
        let zero = DMatrix::zeros(3, 3);
        let lin = LinearElasticity.stress_derivative(&zero, &params());
        let nh = NeoHookean.stress_derivative(&zero, &params());
        assert!((lin - nh).norm() < 1e-12);
    }
}
