//! Newton minimization driven through the [`Form`] contract.
//!
//! Minimizes the potential
//!
//! ```text
//! Π(x) = E(x) - f_ext · x
//! ```
//!
//! where `E` is the energy of a [`Form`]. Fixed DOFs keep the value they
//! have in the starting vector.
//!
//! # Iteration
//!
//! 1. Residual: `g = ∇E(x) - f_ext` (zero on fixed DOFs)
//! 2. Tangent: `H = ∇²E(x)` with fixed rows and columns replaced by identity
//! 3. Direction: `H d = -g` (Cholesky, then LU, then steepest descent)
//! 4. Step: start from `form.max_step_size(x, x + d)` and halve until the
//!    end state is admissible, evaluable, and satisfies the Armijo condition
//! 5. Convergence: `||g|| <= tol_force · max(||f_ext||, ||g_0||)`
//!
//! Every accepted iterate has passed `is_step_collision_free`, so an
//! inversion-checking form never sees an inverted state.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FemError, Result};
use crate::form::Form;
use crate::sparse_cache::to_dense;

/// Newton solver configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonConfig {
    /// Maximum Newton iterations per solve
    pub max_iterations: usize,
    /// Relative residual tolerance
    pub tol_force: f64,
    /// Armijo sufficient-decrease constant
    pub armijo: f64,
    /// Maximum step halvings per iteration
    pub max_line_search: usize,
    /// Number of equal load increments in [`NewtonSolver::solve_load_steps`]
    pub load_steps: usize,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tol_force: 1e-8,
            armijo: 1e-4,
            max_line_search: 30,
            load_steps: 1,
        }
    }
}

/// Convergence status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    Converged,
    NotConverged,
}

/// Newton solve results
#[derive(Debug, Clone)]
pub struct NewtonResults {
    /// Final displacement
    pub displacement: DVector<f64>,
    /// Total Newton iterations
    pub num_iterations: usize,
    /// Final residual norm
    pub residual_norm: f64,
    pub status: ConvergenceStatus,
    /// Residual norm before every iteration
    pub iteration_history: Vec<f64>,
    /// Accepted step fraction of every iteration
    pub step_history: Vec<f64>,
}

/// Newton solver with an inversion-aware backtracking line search
#[derive(Debug, Clone, Default)]
pub struct NewtonSolver {
    config: NewtonConfig,
}

enum Direction {
    Newton,
    SteepestDescent,
}

impl NewtonSolver {
    pub fn new(config: NewtonConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NewtonConfig {
        &self.config
    }

    fn residual<F: Form + ?Sized>(
        form: &F,
        x: &DVector<f64>,
        f_ext: &DVector<f64>,
        fixed: &[usize],
    ) -> DVector<f64> {
        let mut g = form.gradient(x) - f_ext;
        for &i in fixed {
            g[i] = 0.0;
        }
        g
    }

    fn potential<F: Form + ?Sized>(form: &F, x: &DVector<f64>, f_ext: &DVector<f64>) -> f64 {
        form.value(x) - f_ext.dot(x)
    }

    /// Solve `H d = -g` on the free DOFs
    fn direction(h: DMatrix<f64>, g: &DVector<f64>, fixed: &[usize]) -> (DVector<f64>, Direction) {
        let mut h = h;
        for &i in fixed {
            h.row_mut(i).fill(0.0);
            h.column_mut(i).fill(0.0);
            h[(i, i)] = 1.0;
        }
        let rhs = -g;

        let newton = match h.clone().cholesky() {
            Some(chol) => Some(chol.solve(&rhs)),
            None => h.lu().solve(&rhs),
        };
        match newton {
            Some(d) if d.iter().all(|v| v.is_finite()) && d.dot(g) < 0.0 => (d, Direction::Newton),
            _ => (rhs, Direction::SteepestDescent),
        }
    }

    /// Minimize `form.value(x) - f_ext · x` starting from `x0`.
    ///
    /// # Arguments
    /// * `form` - Energy term
    /// * `f_ext` - External force vector
    /// * `fixed` - Global DOF indices held at their value in `x0`
    /// * `x0` - Admissible starting point
    ///
    /// # Errors
    /// - `InvalidState` if `x0` is not admissible for `form`
    /// - `NotConverged` if the iteration budget runs out or the line search
    ///   cannot make progress
    pub fn minimize<F: Form + ?Sized>(
        &self,
        form: &mut F,
        f_ext: &DVector<f64>,
        fixed: &[usize],
        x0: DVector<f64>,
    ) -> Result<NewtonResults> {
        if f_ext.len() != x0.len() {
            return Err(FemError::DimensionMismatch {
                expected: x0.len(),
                found: f_ext.len(),
            });
        }
        if let Some(&i) = fixed.iter().find(|&&i| i >= x0.len()) {
            return Err(FemError::InvalidConfig(format!("fixed DOF {} out of range", i)));
        }
        if !form.is_step_collision_free(&x0, &x0) || !form.is_step_valid(&x0, &x0) {
            return Err(FemError::InvalidState(
                "starting configuration is not admissible".to_string(),
            ));
        }

        let mut x = x0;
        let mut free_force = f_ext.clone();
        for &i in fixed {
            free_force[i] = 0.0;
        }
        let mut iteration_history = Vec::new();
        let mut step_history = Vec::new();
        let mut reference = free_force.norm();

        for iter in 0..self.config.max_iterations {
            let g = Self::residual(form, &x, f_ext, fixed);
            let r_norm = g.norm();
            iteration_history.push(r_norm);
            if iter == 0 {
                reference = reference.max(r_norm);
            }

            if r_norm <= self.config.tol_force * reference || reference == 0.0 {
                debug!(iterations = iter, residual = r_norm, "newton converged");
                return Ok(NewtonResults {
                    displacement: x,
                    num_iterations: iter,
                    residual_norm: r_norm,
                    status: ConvergenceStatus::Converged,
                    iteration_history,
                    step_history,
                });
            }

            let h = to_dense(&form.hessian(&x)?);
            let (d, kind) = Self::direction(h, &g, fixed);
            if let Direction::SteepestDescent = kind {
                debug!(iteration = iter, "falling back to steepest descent");
            }

            let x_full = &x + &d;
            let mut alpha = form.max_step_size(&x, &x_full)?.min(1.0);
            let pi0 = Self::potential(form, &x, f_ext);
            let slope = g.dot(&d);

            let mut accepted = None;
            for _ in 0..self.config.max_line_search {
                if alpha <= 0.0 {
                    break;
                }
                let trial = &x + &d * alpha;
                if form.is_step_collision_free(&x, &trial) && form.is_step_valid(&x, &trial) {
                    let pi = Self::potential(form, &trial, f_ext);
                    if pi.is_finite() && pi <= pi0 + self.config.armijo * alpha * slope {
                        accepted = Some(trial);
                        break;
                    }
                }
                alpha *= 0.5;
            }

            let Some(next) = accepted else {
                warn!(iteration = iter, residual = r_norm, "line search failed");
                return Err(FemError::NotConverged {
                    iterations: iter + 1,
                    residual: r_norm,
                });
            };
            debug!(iteration = iter, residual = r_norm, alpha, "newton step");
            step_history.push(alpha);
            x = next;
            form.solution_changed(&x);
        }

        let residual = Self::residual(form, &x, f_ext, fixed).norm();
        warn!(
            max_iterations = self.config.max_iterations,
            residual, "newton iteration budget exhausted"
        );
        Err(FemError::NotConverged {
            iterations: self.config.max_iterations,
            residual,
        })
    }

    /// Ramp loads and prescribed displacements over `load_steps` increments.
    ///
    /// `fixed` pairs global DOF indices with their full-load values. The form
    /// is told to [`Form::finish`] after every increment.
    pub fn solve_load_steps<F: Form + ?Sized>(
        &self,
        form: &mut F,
        f_ext: &DVector<f64>,
        fixed: &[(usize, f64)],
    ) -> Result<NewtonResults> {
        let n_steps = self.config.load_steps.max(1);
        let indices: Vec<usize> = fixed.iter().map(|&(i, _)| i).collect();
        let mut x = DVector::zeros(f_ext.len());
        let mut total = NewtonResults {
            displacement: x.clone(),
            num_iterations: 0,
            residual_norm: 0.0,
            status: ConvergenceStatus::NotConverged,
            iteration_history: Vec::new(),
            step_history: Vec::new(),
        };

        for step in 1..=n_steps {
            let lambda = step as f64 / n_steps as f64;
            let mut start = x.clone();
            for &(i, value) in fixed {
                if i >= start.len() {
                    return Err(FemError::InvalidConfig(format!("fixed DOF {} out of range", i)));
                }
                start[i] = value * lambda;
            }
            if !form.is_step_collision_free(&x, &start) {
                return Err(FemError::InvalidState(format!(
                    "prescribed displacements of load step {} invert the mesh",
                    step
                )));
            }

            let result = self.minimize(form, &(f_ext * lambda), &indices, start)?;
            form.finish();
            info!(
                step,
                lambda,
                iterations = result.num_iterations,
                residual = result.residual_norm,
                "load step converged"
            );

            x = result.displacement;
            total.num_iterations += result.num_iterations;
            total.residual_norm = result.residual_norm;
            total.status = result.status;
            total.iteration_history.extend(result.iteration_history);
            total.step_history.extend(result.step_history);
        }
        total.displacement = x;
        Ok(total)
    }
}
