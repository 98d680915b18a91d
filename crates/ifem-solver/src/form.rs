//! The contract between energy terms and the nonlinear solver.

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

use crate::error::Result;

/// One additive term of the objective minimized by the solver.
///
/// `value`, `gradient` and `hessian` are evaluated at a full displacement
/// vector. The step queries let a term veto or shorten a proposed update
/// `x0 -> x1` before the solver evaluates anything at `x1`.
pub trait Form {
    /// Energy at `x`
    fn value(&self, x: &DVector<f64>) -> f64;

    /// Gradient of the energy at `x`
    fn gradient(&self, x: &DVector<f64>) -> DVector<f64>;

    /// Sparse Hessian at `x`
    fn hessian(&mut self, x: &DVector<f64>) -> Result<CsrMatrix<f64>>;

    /// Largest fraction of `x1 - x0` that keeps this term admissible.
    fn max_step_size(&mut self, _x0: &DVector<f64>, _x1: &DVector<f64>) -> Result<f64> {
        Ok(1.0)
    }

    /// Cheap admissibility test of the end state only
    fn is_step_collision_free(&self, _x0: &DVector<f64>, _x1: &DVector<f64>) -> bool {
        true
    }

    /// False if the term cannot be evaluated at `x1`
    fn is_step_valid(&self, _x0: &DVector<f64>, _x1: &DVector<f64>) -> bool {
        true
    }

    /// Called once a nonlinear solve has converged
    fn finish(&mut self) {}

    /// Called whenever the solver accepts a new iterate
    fn solution_changed(&mut self, _x: &DVector<f64>) {}
}
