//! Load-stepped Newton solves of a clamped cantilever under gravity.

use ifem_solver::{
    BoundaryConditions, ConvergenceStatus, Dimension, Discretization, ElasticAssembler,
    ElasticForm, Form, FormConfig, Material, MaterialLibrary, MaterialModel, Mesh, NewtonConfig,
    NewtonSolver,
};
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

/// Forwards to an elastic form and keeps every accepted iterate
struct Recorder {
    inner: ElasticForm,
    accepted: Vec<DVector<f64>>,
}

impl Form for Recorder {
    fn value(&self, x: &DVector<f64>) -> f64 {
        self.inner.value(x)
    }

    fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        self.inner.gradient(x)
    }

    fn hessian(&mut self, x: &DVector<f64>) -> ifem_solver::Result<CsrMatrix<f64>> {
        self.inner.hessian(x)
    }

    fn max_step_size(&mut self, x0: &DVector<f64>, x1: &DVector<f64>) -> ifem_solver::Result<f64> {
        self.inner.max_step_size(x0, x1)
    }

    fn is_step_collision_free(&self, x0: &DVector<f64>, x1: &DVector<f64>) -> bool {
        self.inner.is_step_collision_free(x0, x1)
    }

    fn is_step_valid(&self, x0: &DVector<f64>, x1: &DVector<f64>) -> bool {
        self.inner.is_step_valid(x0, x1)
    }

    fn finish(&mut self) {
        self.inner.finish()
    }

    fn solution_changed(&mut self, x: &DVector<f64>) {
        self.accepted.push(x.clone());
    }
}

struct Cantilever {
    form: ElasticForm,
    gravity_force: DVector<f64>,
    fixed: Vec<(usize, f64)>,
    tip: usize,
}

fn cantilever(mesh: Mesh, order: usize, young: f64, gravity: Vec<f64>) -> Cantilever {
    let dim = mesh.dim;
    let material = Material::new("soft")
        .with_model(MaterialModel::NeoHookean)
        .with_elastic(young, 0.3)
        .with_density(1.0);
    let library = MaterialLibrary::uniform(material);
    let disc = Discretization::build(&mesh, order, 1).unwrap();
    let assembler = ElasticAssembler::from_library(dim, &library, mesh.num_elements()).unwrap();

    let length = disc.nodes.column(0).max();
    let mut bcs = BoundaryConditions::new();
    bcs.fix_nodes(&disc.nodes_where(|p| p[0].abs() < 1e-12), dim);
    bcs.gravity = Some(gravity);
    let fixed = bcs
        .constrained_indices(dim, disc.n_bases)
        .unwrap()
        .into_iter()
        .collect();
    let tip = disc.nodes_where(|p| (p[0] - length).abs() < 1e-12)[0];

    let form = ElasticForm::new(
        disc.n_bases,
        disc.bases,
        disc.geom_bases,
        assembler,
        FormConfig::default(),
    )
    .unwrap();
    let gravity_force = form.body_force(bcs.gravity.as_deref().unwrap_or(&[])).unwrap();
    Cantilever {
        form,
        gravity_force,
        fixed,
        tip,
    }
}

#[test]
fn stiff_beam_sags_under_gravity() {
    let mesh = Mesh::rectangle(8, 2, 4.0, 1.0).unwrap();
    let mut problem = cantilever(mesh, 1, 1.0e5, vec![0.0, -9.81]);
    let total_weight = -problem.gravity_force.iter().skip(1).step_by(2).sum::<f64>();
    assert!((total_weight - 4.0 * 9.81).abs() < 1e-9);

    let solver = NewtonSolver::new(NewtonConfig {
        load_steps: 2,
        ..NewtonConfig::default()
    });
    let result = solver
        .solve_load_steps(&mut problem.form, &problem.gravity_force, &problem.fixed)
        .unwrap();
    assert_eq!(result.status, ConvergenceStatus::Converged);

    let x = &result.displacement;
    assert!(x[2 * problem.tip + 1] < 0.0);
    for &(i, _) in &problem.fixed {
        assert_eq!(x[i], 0.0);
    }
    assert!(problem.form.is_step_collision_free(x, x));
    assert_eq!(problem.form.tree(0).depth(), 0);
}

#[test]
fn soft_quadratic_block_never_accepts_inverted_states() {
    let mesh = Mesh::box_mesh([3, 1, 1], [3.0, 1.0, 1.0]).unwrap();
    let problem = cantilever(mesh, 2, 300.0, vec![0.0, 0.0, -9.81]);
    let mut recorder = Recorder {
        inner: problem.form,
        accepted: Vec::new(),
    };

    let solver = NewtonSolver::new(NewtonConfig {
        load_steps: 3,
        max_iterations: 60,
        ..NewtonConfig::default()
    });
    // large deformation: convergence is not the point, admissibility is
    let outcome = solver.solve_load_steps(&mut recorder, &problem.gravity_force, &problem.fixed);

    assert!(!recorder.accepted.is_empty());
    for x in &recorder.accepted {
        assert!(recorder.inner.is_step_collision_free(x, x));
        assert!(recorder.inner.value(x).is_finite());
    }
    if let Ok(result) = outcome {
        assert!(result.displacement[3 * problem.tip + 2] < 0.0);
    }
}

#[test]
fn dimension_of_gravity_must_match() {
    let mesh = Mesh::rectangle(2, 1, 2.0, 1.0).unwrap();
    let material = Material::new("steel").with_elastic(2.0e5, 0.3).with_density(7.8);
    let library = MaterialLibrary::uniform(material);
    let disc = Discretization::build(&mesh, 1, 1).unwrap();
    let assembler =
        ElasticAssembler::from_library(Dimension::Two, &library, mesh.num_elements()).unwrap();
    let form = ElasticForm::new(
        disc.n_bases,
        disc.bases,
        disc.geom_bases,
        assembler,
        FormConfig::default(),
    )
    .unwrap();
    assert!(form.body_force(&[0.0, 0.0, -9.81]).is_err());
}
