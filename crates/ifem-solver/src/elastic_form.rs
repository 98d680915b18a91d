//! Elastic energy form with continuous inversion checks and adaptive
//! quadrature.
//!
//! The form owns the per-element bases, their assembly caches and one
//! [`SubdivisionTree`] per element. When the step-size search bounds a step
//! because of an element, the search tree of that element is merged into the
//! persistent tree and the element's quadrature is rebuilt over the leaves,
//! so later assemblies integrate the strongly varying region more finely.
//! [`Form::finish`] collapses every tree again.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::assembler::ElasticAssembler;
use crate::assembly_values::AssemblyValsCache;
use crate::basis::ElementBasis;
use crate::dimension::Dimension;
use crate::error::{FemError, Result};
use crate::form::Form;
use crate::jacobian::evaluate_jacobian;
use crate::parallel::build_pool;
use crate::quadrature::{Quadrature, refine_quadrature, simplex_quadrature};
use crate::refinement::SubdivisionTree;
use crate::sparse_cache::SparseMatrixCache;
use crate::step_size::{StepSizeConfig, is_valid, max_time_step};

/// How element inversion is detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ElementInversionCheck {
    /// Determinant sign at quadrature points only
    Discrete,
    /// Certified over whole elements and along the step
    #[default]
    Continuous,
}

/// How quadrature reacts to elements that bound a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QuadratureRefinement {
    None,
    #[default]
    Subdivision,
}

/// Elastic form settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormConfig {
    pub check_inversion: ElementInversionCheck,
    pub quadrature_refinement: QuadratureRefinement,
    /// Steps below this fraction trigger quadrature refinement
    pub refinement_step_threshold: f64,
    /// Project element Hessians onto the PSD cone
    pub project_to_psd: bool,
    /// Worker threads (0 = rayon default)
    pub n_threads: usize,
    pub step_size: StepSizeConfig,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            check_inversion: ElementInversionCheck::Continuous,
            quadrature_refinement: QuadratureRefinement::Subdivision,
            refinement_step_threshold: 0.5,
            project_to_psd: false,
            n_threads: 0,
            step_size: StepSizeConfig::default(),
        }
    }
}

/// Elastic energy of a whole mesh.
#[derive(Debug)]
pub struct ElasticForm {
    dim: Dimension,
    n_bases: usize,
    bases: Vec<ElementBasis>,
    geom_bases: Vec<ElementBasis>,
    assembler: ElasticAssembler,
    config: FormConfig,
    pool: ThreadPool,
    cache: AssemblyValsCache,
    mat_cache: SparseMatrixCache,
    trees: Vec<SubdivisionTree>,
    stiffness: Option<CsrMatrix<f64>>,
}

fn uniform_order(kind: &'static str, bases: &[ElementBasis]) -> Result<usize> {
    let Some(first) = bases.first() else {
        return Ok(1);
    };
    for basis in bases {
        if basis.order != first.order {
            return Err(FemError::NonUniformOrder {
                kind,
                expected: first.order,
                found: basis.order,
                element: basis.element,
            });
        }
    }
    Ok(first.order)
}

impl ElasticForm {
    /// Build the form and validate the rest configuration.
    ///
    /// # Arguments
    /// * `n_bases` - Number of global displacement bases
    /// * `bases` - Displacement basis of every element
    /// * `geom_bases` - Geometric basis of every element
    /// * `assembler` - Element kernels and material parameters
    /// * `config` - Form settings
    pub fn new(
        n_bases: usize,
        mut bases: Vec<ElementBasis>,
        mut geom_bases: Vec<ElementBasis>,
        assembler: ElasticAssembler,
        config: FormConfig,
    ) -> Result<Self> {
        if bases.len() != geom_bases.len() {
            return Err(FemError::DimensionMismatch {
                expected: bases.len(),
                found: geom_bases.len(),
            });
        }
        if assembler.n_elements() != bases.len() {
            return Err(FemError::DimensionMismatch {
                expected: bases.len(),
                found: assembler.n_elements(),
            });
        }
        let dim = assembler.dim();
        let pool = build_pool(config.n_threads)?;

        if config.check_inversion == ElementInversionCheck::Continuous {
            let checked = uniform_order("basis", &bases)
                .and_then(|order| uniform_order("geometric basis", &geom_bases).map(|g| (order, g)));
            let (order, geom_order) = checked.inspect_err(|err| error!(%err, "continuous inversion check"))?;
            for o in [order, geom_order] {
                if o > 2 {
                    error!(order = o, "continuous inversion check supports orders up to 2");
                    return Err(FemError::UnsupportedOrder(o));
                }
            }
        }

        for (basis, geom) in bases.iter_mut().zip(geom_bases.iter_mut()) {
            let quadrature = simplex_quadrature(dim, assembler.quadrature_order(basis.order))?;
            geom.set_quadrature(quadrature.clone());
            basis.set_quadrature(quadrature);
        }
        let cache = AssemblyValsCache::new(&bases, &geom_bases)?;

        let rest = DVector::zeros(n_bases * dim.value());
        match config.check_inversion {
            ElementInversionCheck::Continuous => {
                let record = is_valid(&pool, dim, &bases, &geom_bases, &rest, &config.step_size)
                    .inspect_err(|err| error!(%err, "rest configuration check failed"))?;
                if !record.is_valid {
                    let element = record.element.unwrap_or(0);
                    let (min_det, _) = evaluate_jacobian(
                        &bases[element],
                        &geom_bases[element],
                        &bases[element].quadrature.points,
                        &rest,
                    )?;
                    error!(element, min_det, "rest configuration is inverted");
                    return Err(FemError::InvertedElement { element, min_det });
                }
            }
            ElementInversionCheck::Discrete => {
                for values in cache.iter() {
                    let min_det = values.det.min();
                    if !(min_det > 0.0) {
                        error!(element = values.element, min_det, "rest configuration is inverted");
                        return Err(FemError::InvertedElement {
                            element: values.element,
                            min_det,
                        });
                    }
                }
            }
        }

        let trees = vec![SubdivisionTree::new(dim); bases.len()];
        let mut form = Self {
            dim,
            n_bases,
            bases,
            geom_bases,
            assembler,
            config,
            pool,
            cache,
            mat_cache: SparseMatrixCache::new(),
            trees,
            stiffness: None,
        };

        if form.assembler.is_linear() {
            form.stiffness = Some(form.assemble_hessian(&rest)?);
        }

        info!(
            elements = form.n_elements(),
            bases = form.n_bases,
            model = ?form.assembler.model(),
            check = ?form.config.check_inversion,
            "elastic form ready"
        );
        Ok(form)
    }

    pub fn dim(&self) -> Dimension {
        self.dim
    }

    pub fn n_elements(&self) -> usize {
        self.bases.len()
    }

    pub fn n_bases(&self) -> usize {
        self.n_bases
    }

    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    /// Persistent refinement tree of element `e`
    pub fn tree(&self, e: usize) -> &SubdivisionTree {
        &self.trees[e]
    }

    /// Current integration rule of element `e`
    pub fn quadrature(&self, e: usize) -> &Quadrature {
        &self.bases[e].quadrature
    }

    /// Elastic energy of every element
    pub fn value_per_element(&self, x: &DVector<f64>) -> DVector<f64> {
        self.assembler
            .assemble_energy_per_element(&self.pool, &self.cache, &self.bases, x)
    }

    /// Number of rest vertices carried by the geometric bases
    pub fn n_vertices(&self) -> usize {
        self.geom_bases
            .iter()
            .flat_map(|b| b.global.iter())
            .max()
            .map_or(0, |&g| g + 1)
    }

    fn check_dofs(&self, x: &DVector<f64>) -> Result<()> {
        let expected = self.n_bases * self.dim.value();
        if x.len() != expected {
            return Err(FemError::DimensionMismatch {
                expected,
                found: x.len(),
            });
        }
        Ok(())
    }

    /// Derivative of the adjoint-weighted elastic force with respect to the
    /// per-element Lamé parameters, `[∂/∂λ_e ..., ∂/∂μ_e ...]`.
    pub fn force_material_derivative(
        &self,
        x: &DVector<f64>,
        adjoint: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        self.check_dofs(x)?;
        self.check_dofs(adjoint)?;
        self.assembler
            .force_material_derivative(&self.pool, &self.cache, &self.bases, x, adjoint)
    }

    /// Derivative of the adjoint-weighted elastic force with respect to the
    /// rest vertex positions, length `n_vertices · dim`.
    pub fn force_shape_derivative(
        &self,
        x: &DVector<f64>,
        adjoint: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        self.check_dofs(x)?;
        self.check_dofs(adjoint)?;
        self.assembler.force_shape_derivative(
            &self.pool,
            &self.cache,
            &self.bases,
            &self.geom_bases,
            self.n_vertices(),
            x,
            adjoint,
        )
    }

    /// Consistent nodal forces of gravity acting on the material density
    pub fn body_force(&self, gravity: &[f64]) -> Result<DVector<f64>> {
        self.assembler
            .assemble_body_force(&self.cache, &self.bases, self.n_bases, gravity)
    }

    /// Leaves of the persistent trees in deformed coordinates.
    ///
    /// With `element = None` every element contributes. Returns the corner
    /// positions (one row per point) and the corner indices of every leaf.
    pub fn refined_mesh(
        &self,
        x: &DVector<f64>,
        element: Option<usize>,
    ) -> Result<(DMatrix<f64>, Vec<Vec<usize>>)> {
        let elements: Vec<usize> = match element {
            Some(e) if e >= self.n_elements() => {
                return Err(FemError::InvalidState(format!(
                    "element {} out of range ({} elements)",
                    e,
                    self.n_elements()
                )));
            }
            Some(e) => vec![e],
            None => (0..self.n_elements()).collect(),
        };

        let d = self.dim.value();
        let n_corners = self.dim.n_vertices();
        let mut rows: Vec<f64> = Vec::new();
        let mut cells: Vec<Vec<usize>> = Vec::new();
        let mut next = 0;
        for e in elements {
            for leaf in self.trees[e].leaves() {
                let rest = self.geom_bases[e].map_points(&leaf.corners)?;
                let deformed = rest + self.bases[e].interpolate(&leaf.corners, x)?;
                for r in 0..n_corners {
                    rows.extend(deformed.row(r).iter());
                }
                cells.push((next..next + n_corners).collect());
                next += n_corners;
            }
        }
        Ok((DMatrix::from_row_slice(next, d, &rows), cells))
    }

    fn assemble_hessian(&mut self, x: &DVector<f64>) -> Result<CsrMatrix<f64>> {
        self.assembler.assemble_hessian(
            &self.pool,
            &self.cache,
            &self.bases,
            self.n_bases,
            x,
            self.config.project_to_psd,
            &mut self.mat_cache,
        )
    }

    /// Rebuild the quadrature of element `e` from its persistent tree.
    fn refine_element(&mut self, e: usize) -> Result<()> {
        let order = self.assembler.quadrature_order(self.bases[e].order);
        let quadrature = refine_quadrature(&self.trees[e], self.dim, order)?;
        self.geom_bases[e].set_quadrature(quadrature.clone());
        self.bases[e].set_quadrature(quadrature);
        self.cache.update(e, &self.bases[e], &self.geom_bases[e])
    }

    /// Minimum deformed determinant of element `e` at its quadrature points
    fn quadrature_min_det(&self, e: usize, x: &DVector<f64>) -> Result<f64> {
        let (_, min_def) = evaluate_jacobian(
            &self.bases[e],
            &self.geom_bases[e],
            &self.bases[e].quadrature.points,
            x,
        )?;
        Ok(min_def)
    }
}

impl Form for ElasticForm {
    fn value(&self, x: &DVector<f64>) -> f64 {
        let energy = self
            .assembler
            .assemble_energy(&self.pool, &self.cache, &self.bases, x);
        debug_assert!({
            let sum = self.value_per_element(x).sum();
            !energy.is_finite() || (energy - sum).abs() <= 1e-10 * energy.abs().max(1.0)
        });
        energy
    }

    fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        self.assembler
            .assemble_gradient(&self.pool, &self.cache, &self.bases, self.n_bases, x)
    }

    fn hessian(&mut self, x: &DVector<f64>) -> Result<CsrMatrix<f64>> {
        match &self.stiffness {
            Some(k) => Ok(k.clone()),
            None => self.assemble_hessian(x),
        }
    }

    fn max_step_size(&mut self, x0: &DVector<f64>, x1: &DVector<f64>) -> Result<f64> {
        self.check_dofs(x0)?;
        self.check_dofs(x1)?;
        if self.config.check_inversion == ElementInversionCheck::Discrete {
            return Ok(1.0);
        }

        let result = max_time_step(
            &self.pool,
            self.dim,
            &self.bases,
            &self.geom_bases,
            x0,
            x1,
            &self.config.step_size,
        )?;
        if result.step <= 0.0 {
            warn!(element = ?result.invalid_element, "zero step size");
        }

        let Some(e) = result.invalid_element else {
            return Ok(result.step);
        };
        if self.config.quadrature_refinement == QuadratureRefinement::Subdivision
            && result.step < self.config.refinement_step_threshold
            && self.trees[e].merge(&result.tree)
        {
            self.refine_element(e)?;

            let at = |t: f64| x0 + (x1 - x0) * t;
            let det_start = self.quadrature_min_det(e, x0)?;
            let det_step = self.quadrature_min_det(e, &at(result.step))?;
            let det_invalid = self.quadrature_min_det(e, &at(result.invalid_step))?;
            if !(det_start > 0.0) {
                warn!(element = e, det_start, "refined quadrature sees an inverted start");
            }
            debug!(
                element = e,
                depth = self.trees[e].depth(),
                points = self.bases[e].quadrature.size(),
                step = result.step,
                invalid_step = result.invalid_step,
                det_start,
                det_step,
                det_invalid,
                "refined element quadrature"
            );
        }
        Ok(result.step)
    }

    fn is_step_collision_free(&self, _x0: &DVector<f64>, x1: &DVector<f64>) -> bool {
        if let Err(err) = self.check_dofs(x1) {
            warn!(%err, "validity check on a mis-sized state");
            return false;
        }
        if self.config.check_inversion == ElementInversionCheck::Discrete {
            return true;
        }
        match is_valid(
            &self.pool,
            self.dim,
            &self.bases,
            &self.geom_bases,
            x1,
            &self.config.step_size,
        ) {
            Ok(record) => {
                if !record.is_valid {
                    debug!(element = ?record.element, "step end is inverted");
                }
                record.is_valid
            }
            Err(err) => {
                warn!(%err, "validity check failed");
                false
            }
        }
    }

    fn is_step_valid(&self, _x0: &DVector<f64>, x1: &DVector<f64>) -> bool {
        self.gradient(x1).iter().all(|g| g.is_finite())
    }

    fn finish(&mut self) {
        let mut refined = 0;
        for e in 0..self.trees.len() {
            if !self.trees[e].has_children() {
                continue;
            }
            self.trees[e].reset();
            refined += 1;
            if let Err(err) = self.refine_element(e) {
                warn!(element = e, %err, "failed to restore base quadrature");
            }
        }
        debug!(refined, "reset refinement trees");
    }

    fn solution_changed(&mut self, _x: &DVector<f64>) {}
}
