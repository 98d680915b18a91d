//! Continuous inversion-free step size along a linear displacement path.
//!
//! Given two global displacements `x0` (valid) and `x1`, find the largest
//! `t* ∈ [0, 1]` such that `x(t) = x0 + t (x1 - x0)` keeps the deformed
//! Jacobian determinant positive inside every element for `t ∈ [0, t*)`.
//!
//! ## Method
//!
//! 1. Coarse pass (parallel): enclose the determinant of every element over
//!    the whole element and the whole time range. Certified elements are
//!    dropped.
//! 2. Refinement: cells `(element, sub-simplex, [t0, t1])` are popped in
//!    order of increasing `t0`. A cell is
//!    - an inversion if a sampled determinant at `t0` is not above the
//!      threshold,
//!    - certified if its enclosure is above the threshold,
//!    - otherwise split in space or in time, whichever spread dominates.
//!
//!    Every popped cell starts no earlier than any other pending cell, so
//!    the first inversion or unresolved cell bounds `t*` by its `t0`.
//!
//! Spatial splits are recorded in a per-element [`SubdivisionTree`], which
//! is handed back so that the caller can refine the element's quadrature.
//!
//! The enclosures use floating-point interval arithmetic widened by a
//! relative epsilon. Elements whose determinant comes within rounding of the
//! threshold can therefore be certified or rejected by that margin.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use nalgebra::DVector;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::basis::ElementBasis;
use crate::dimension::Dimension;
use crate::error::{FemError, Result};
use crate::jacobian::JacobianField;
use crate::parallel::map_reduce;
use crate::refinement::{SubSimplex, SubdivisionTree};

/// Entry spreads below this are treated as constant in space.
const NEGLIGIBLE_SPREAD: f64 = 1e-12;

/// Limits of the continuous search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepSizeConfig {
    /// Maximum number of refinement cells processed per query
    pub max_iterations: usize,
    /// Maximum spatial refinement level of a cell
    pub max_depth: usize,
    /// Time intervals shorter than this are not bisected further
    pub time_tolerance: f64,
    /// Normalized determinants at or below this count as inverted
    pub jacobian_threshold: f64,
}

impl Default for StepSizeConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100_000,
            max_depth: 6,
            time_tolerance: 1e-6,
            jacobian_threshold: 0.0,
        }
    }
}

/// Outcome of [`max_time_step`].
#[derive(Debug, Clone)]
pub struct StepSizeResult {
    /// Largest certified step fraction
    pub step: f64,
    /// Element owning the cell that bounded the step
    pub invalid_element: Option<usize>,
    /// Earliest time at which that element was found or suspected inverted
    pub invalid_step: f64,
    /// Search tree of `invalid_element` (a single leaf if none)
    pub tree: SubdivisionTree,
}

/// Outcome of [`is_valid`].
#[derive(Debug, Clone)]
pub struct ValidityRecord {
    pub is_valid: bool,
    /// First element found invalid
    pub element: Option<usize>,
    /// Search tree of `element` (a single leaf if none)
    pub tree: SubdivisionTree,
}

#[derive(Debug, Clone)]
struct Cell {
    element: usize,
    /// Node of the element's search tree covering `simplex`
    node: usize,
    simplex: SubSimplex,
    t0: f64,
    t1: f64,
}

// BinaryHeap is a max-heap; reverse so the earliest t0 pops first.
impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .t0
            .total_cmp(&self.t0)
            .then_with(|| other.element.cmp(&self.element))
            .then_with(|| self.simplex.level.cmp(&other.simplex.level))
    }
}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cell {}

#[derive(Debug, Clone, Copy, PartialEq)]
enum EventKind {
    /// A sampled determinant was not above the threshold
    Inversion,
    /// Neither split could certify the cell
    Unresolved,
    /// The cell budget ran out
    Budget,
}

#[derive(Debug, Clone, Copy)]
struct Event {
    kind: EventKind,
    element: usize,
    bound: f64,
    invalid_step: f64,
}

struct Search {
    event: Option<Event>,
    trees: HashMap<usize, SubdivisionTree>,
    iterations: usize,
    candidates: usize,
}

fn check_sizes(
    dim: Dimension,
    bases: &[ElementBasis],
    geom_bases: &[ElementBasis],
    xs: &[&DVector<f64>],
) -> Result<()> {
    if bases.len() != geom_bases.len() {
        return Err(FemError::DimensionMismatch {
            expected: bases.len(),
            found: geom_bases.len(),
        });
    }
    // every global basis index must address a full node block
    let n_nodes = bases
        .iter()
        .flat_map(|b| b.global.iter())
        .max()
        .map_or(0, |&g| g + 1);
    let required = n_nodes * dim.value();
    if let Some(x) = xs.iter().find(|x| x.len() < required) {
        return Err(FemError::DimensionMismatch {
            expected: required,
            found: x.len(),
        });
    }
    for pair in xs.windows(2) {
        if pair[0].len() != pair[1].len() {
            return Err(FemError::DimensionMismatch {
                expected: pair[0].len(),
                found: pair[1].len(),
            });
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn search(
    pool: &ThreadPool,
    dim: Dimension,
    bases: &[ElementBasis],
    geom_bases: &[ElementBasis],
    x0: &DVector<f64>,
    x1: &DVector<f64>,
    t_end: f64,
    config: &StepSizeConfig,
) -> Result<Search> {
    let threshold = config.jacobian_threshold;
    let root = SubSimplex::reference(dim);

    let parts = map_reduce(
        pool,
        bases.len(),
        || Ok(Vec::new()),
        |acc: &mut Result<Vec<JacobianField>>, e| {
            if acc.is_err() {
                return;
            }
            match JacobianField::new(&bases[e], &geom_bases[e], x0, x1) {
                Ok(field) => {
                    let certified = field.enclosure(&root, 0.0, t_end).lo > threshold;
                    if let (false, Ok(candidates)) = (certified, acc.as_mut()) {
                        candidates.push(field);
                    }
                }
                Err(err) => *acc = Err(err),
            }
        },
    );

    let mut fields = HashMap::new();
    let mut heap = BinaryHeap::new();
    for part in parts {
        for field in part? {
            heap.push(Cell {
                element: field.element,
                node: SubdivisionTree::ROOT,
                simplex: root.clone(),
                t0: 0.0,
                t1: t_end,
            });
            fields.insert(field.element, field);
        }
    }
    let candidates = fields.len();

    let mut trees: HashMap<usize, SubdivisionTree> = HashMap::new();
    let mut iterations = 0;
    let mut event = None;

    while let Some(cell) = heap.pop() {
        if iterations >= config.max_iterations {
            event = Some(Event {
                kind: EventKind::Budget,
                element: cell.element,
                bound: cell.t0,
                invalid_step: cell.t1,
            });
            break;
        }
        iterations += 1;

        let Some(field) = fields.get(&cell.element) else {
            continue;
        };

        if field.min_sample(&cell.simplex, cell.t0) <= threshold {
            event = Some(Event {
                kind: EventKind::Inversion,
                element: cell.element,
                bound: cell.t0,
                invalid_step: cell.t0,
            });
            break;
        }

        if field.enclosure(&cell.simplex, cell.t0, cell.t1).lo > threshold {
            continue;
        }

        let spatial = field.spatial_spread(&cell.simplex, cell.t0, cell.t1);
        let temporal = field.temporal_spread(&cell.simplex, cell.t0, cell.t1);
        let can_split_time = cell.t1 - cell.t0 > config.time_tolerance;
        let can_split_space = cell.simplex.level < config.max_depth && spatial > NEGLIGIBLE_SPREAD;

        if can_split_space && (spatial > temporal || !can_split_time) {
            let tree = trees
                .entry(cell.element)
                .or_insert_with(|| SubdivisionTree::new(dim));
            let first = tree.subdivide(cell.node);
            for i in 0..dim.n_children() {
                heap.push(Cell {
                    node: first + i,
                    simplex: cell.simplex.child(dim, i),
                    ..cell.clone()
                });
            }
        } else if can_split_time {
            let mid = 0.5 * (cell.t0 + cell.t1);
            heap.push(Cell {
                t1: mid,
                ..cell.clone()
            });
            heap.push(Cell { t0: mid, ..cell });
        } else {
            event = Some(Event {
                kind: EventKind::Unresolved,
                element: cell.element,
                bound: cell.t0,
                invalid_step: cell.t1,
            });
            break;
        }
    }

    if let Some(ev) = &event {
        trace!(kind = ?ev.kind, element = ev.element, bound = ev.bound, "search stopped");
    }

    Ok(Search {
        event,
        trees,
        iterations,
        candidates,
    })
}

/// Largest step fraction from `x0` towards `x1` that keeps every element
/// non-inverted.
///
/// # Arguments
/// * `pool` - Worker pool for the coarse pass
/// * `dim` - Mesh dimension
/// * `bases` / `geom_bases` - Displacement and geometric bases per element
/// * `x0` - Current displacement, assumed valid
/// * `x1` - Proposed displacement
/// * `config` - Search limits
pub fn max_time_step(
    pool: &ThreadPool,
    dim: Dimension,
    bases: &[ElementBasis],
    geom_bases: &[ElementBasis],
    x0: &DVector<f64>,
    x1: &DVector<f64>,
    config: &StepSizeConfig,
) -> Result<StepSizeResult> {
    check_sizes(dim, bases, geom_bases, &[x0, x1])?;
    if x0.iter().chain(x1.iter()).any(|v| !v.is_finite()) {
        warn!("non-finite displacement in step size query, rejecting step");
        return Ok(StepSizeResult {
            step: 0.0,
            invalid_element: None,
            invalid_step: 0.0,
            tree: SubdivisionTree::new(dim),
        });
    }

    let mut outcome = search(pool, dim, bases, geom_bases, x0, x1, 1.0, config)?;

    let result = match outcome.event {
        None => StepSizeResult {
            step: 1.0,
            invalid_element: None,
            invalid_step: 1.0,
            tree: SubdivisionTree::new(dim),
        },
        Some(ev) => StepSizeResult {
            step: ev.bound,
            invalid_element: Some(ev.element),
            invalid_step: ev.invalid_step,
            tree: outcome
                .trees
                .remove(&ev.element)
                .unwrap_or_else(|| SubdivisionTree::new(dim)),
        },
    };

    if result.step <= 0.0 {
        error!(
            element = ?result.invalid_element,
            "step size is zero, the starting configuration is inverted"
        );
    } else if let Some(ev) = outcome.event.filter(|ev| ev.kind == EventKind::Budget) {
        warn!(
            element = ev.element,
            step = result.step,
            max_iterations = config.max_iterations,
            "step size search ran out of iterations"
        );
    }
    debug!(
        step = result.step,
        invalid_element = ?result.invalid_element,
        invalid_step = result.invalid_step,
        depth = result.tree.depth(),
        candidates = outcome.candidates,
        iterations = outcome.iterations,
        "max step size"
    );
    Ok(result)
}

/// Certify that every element of the configuration `x` is non-inverted.
///
/// Cells that cannot be certified at the maximum depth count as invalid.
pub fn is_valid(
    pool: &ThreadPool,
    dim: Dimension,
    bases: &[ElementBasis],
    geom_bases: &[ElementBasis],
    x: &DVector<f64>,
    config: &StepSizeConfig,
) -> Result<ValidityRecord> {
    check_sizes(dim, bases, geom_bases, &[x])?;
    if x.iter().any(|v| !v.is_finite()) {
        return Ok(ValidityRecord {
            is_valid: false,
            element: None,
            tree: SubdivisionTree::new(dim),
        });
    }

    let mut outcome = search(pool, dim, bases, geom_bases, x, x, 0.0, config)?;
    Ok(match outcome.event {
        None => ValidityRecord {
            is_valid: true,
            element: None,
            tree: SubdivisionTree::new(dim),
        },
        Some(ev) => {
            trace!(element = ev.element, kind = ?ev.kind, "configuration not certified");
            ValidityRecord {
                is_valid: false,
                element: Some(ev.element),
                tree: outcome
                    .trees
                    .remove(&ev.element)
                    .unwrap_or_else(|| SubdivisionTree::new(dim)),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::Discretization;
    use crate::mesh::{Element, ElementType, Mesh, Node};
    use crate::parallel::build_pool;

    fn single_triangle(order: usize) -> Discretization {
        let mut mesh = Mesh::new(Dimension::Two);
        mesh.add_node(Node::planar(0.0, 0.0));
        mesh.add_node(Node::planar(1.0, 0.0));
        mesh.add_node(Node::planar(0.0, 1.0));
        mesh.add_element(Element::new(ElementType::Tri3, vec![0, 1, 2]))
            .unwrap();
        Discretization::build(&mesh, order, 1).unwrap()
    }

    #[test]
    fn zero_update_allows_full_step() {
        let pool = build_pool(2).unwrap();
        let mesh = Mesh::box_mesh([2, 1, 1], [1.0, 1.0, 1.0]).unwrap();
        let disc = Discretization::build(&mesh, 2, 1).unwrap();
        let x = DVector::from_fn(disc.n_dofs(), |i, _| 1e-4 * ((i % 5) as f64));
        let result = max_time_step(
            &pool,
            Dimension::Three,
            &disc.bases,
            &disc.geom_bases,
            &x,
            &x,
            &StepSizeConfig::default(),
        )
        .unwrap();
        assert_eq!(result.step, 1.0);
        assert_eq!(result.invalid_element, None);
        assert_eq!(result.tree.depth(), 0);
    }

    #[test]
    fn fold_is_bounded_by_crossing_time() {
        let pool = build_pool(1).unwrap();
        let disc = single_triangle(1);
        let x0 = DVector::zeros(disc.n_dofs());
        let mut x1 = DVector::zeros(disc.n_dofs());
        // vertex 2 moves from (0, 1) to (0, -1); det F = 1 - 2t
        x1[5] = -2.0;
        let config = StepSizeConfig::default();
        let result =
            max_time_step(&pool, Dimension::Two, &disc.bases, &disc.geom_bases, &x0, &x1, &config)
                .unwrap();
        assert!(result.step > 0.0 && result.step <= 0.5, "step {}", result.step);
        assert!(0.5 - result.step < 1e-5);
        assert_eq!(result.invalid_element, Some(0));
        assert!(result.invalid_step >= result.step);
    }

    #[test]
    fn quadratic_bulge_triggers_spatial_refinement() {
        let pool = build_pool(1).unwrap();
        let disc = single_triangle(2);
        let x0 = DVector::zeros(disc.n_dofs());
        let mut x1 = DVector::zeros(disc.n_dofs());
        // push the (1, 2) edge midpoint across the opposite corner
        let edge_node = disc.bases[0].global[4];
        x1[2 * edge_node] = -1.5;
        x1[2 * edge_node + 1] = -1.5;
        let config = StepSizeConfig::default();
        let result =
            max_time_step(&pool, Dimension::Two, &disc.bases, &disc.geom_bases, &x0, &x1, &config)
                .unwrap();
        assert!(result.step > 0.0 && result.step < 1.0);
        assert_eq!(result.invalid_element, Some(0));
        assert!(result.tree.depth() > 0);

        // the configuration just before the bound is certified valid
        let before = &x0 + (&x1 - &x0) * (0.5 * result.step);
        let record =
            is_valid(&pool, Dimension::Two, &disc.bases, &disc.geom_bases, &before, &config).unwrap();
        assert!(record.is_valid);
    }

    #[test]
    fn validity_of_static_configurations() {
        let pool = build_pool(1).unwrap();
        let disc = single_triangle(1);
        let config = StepSizeConfig::default();
        let rest = DVector::zeros(disc.n_dofs());
        let record =
            is_valid(&pool, Dimension::Two, &disc.bases, &disc.geom_bases, &rest, &config).unwrap();
        assert!(record.is_valid);
        assert_eq!(record.element, None);

        let mut folded = DVector::zeros(disc.n_dofs());
        folded[5] = -1.0;
        let record =
            is_valid(&pool, Dimension::Two, &disc.bases, &disc.geom_bases, &folded, &config).unwrap();
        assert!(!record.is_valid);
        assert_eq!(record.element, Some(0));

        let mut nan = DVector::zeros(disc.n_dofs());
        nan[0] = f64::NAN;
        let record =
            is_valid(&pool, Dimension::Two, &disc.bases, &disc.geom_bases, &nan, &config).unwrap();
        assert!(!record.is_valid);
    }

    #[test]
    fn exhausted_budget_is_conservative() {
        let pool = build_pool(1).unwrap();
        let disc = single_triangle(1);
        let x0 = DVector::zeros(disc.n_dofs());
        let mut x1 = DVector::zeros(disc.n_dofs());
        x1[5] = -2.0;
        let config = StepSizeConfig {
            max_iterations: 3,
            ..StepSizeConfig::default()
        };
        let result =
            max_time_step(&pool, Dimension::Two, &disc.bases, &disc.geom_bases, &x0, &x1, &config)
                .unwrap();
        assert!(result.step < 0.5);
        assert!(result.step >= 0.0);
    }

    #[test]
    fn inverted_rest_element_is_an_error() {
        let pool = build_pool(1).unwrap();
        let mut mesh = Mesh::new(Dimension::Two);
        mesh.add_node(Node::planar(0.0, 0.0));
        mesh.add_node(Node::planar(0.0, 1.0));
        mesh.add_node(Node::planar(1.0, 0.0));
        mesh.add_element(Element::new(ElementType::Tri3, vec![0, 1, 2]))
            .unwrap();
        let disc = Discretization::build(&mesh, 1, 1).unwrap();
        let x = DVector::zeros(disc.n_dofs());
        let result = is_valid(
            &pool,
            Dimension::Two,
            &disc.bases,
            &disc.geom_bases,
            &x,
            &StepSizeConfig::default(),
        );
        assert!(matches!(result, Err(FemError::InvertedElement { element: 0, .. })));
    }

    #[test]
    fn short_displacements_are_rejected() {
        let pool = build_pool(2).unwrap();
        let disc = single_triangle(1);
        let config = StepSizeConfig::default();
        let short = DVector::zeros(3);
        let full = DVector::zeros(disc.n_dofs());

        let step = max_time_step(&pool, Dimension::Two, &disc.bases, &disc.geom_bases, &short, &short, &config);
        assert!(matches!(step, Err(FemError::DimensionMismatch { expected: 6, found: 3 })));
        let mixed = max_time_step(&pool, Dimension::Two, &disc.bases, &disc.geom_bases, &full, &short, &config);
        assert!(mixed.is_err());
        let valid = is_valid(&pool, Dimension::Two, &disc.bases, &disc.geom_bases, &short, &config);
        assert!(matches!(valid, Err(FemError::DimensionMismatch { .. })));
    }
}
