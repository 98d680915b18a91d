use std::path::Path;
use std::process::ExitCode;

use ifem_solver::{
    Discretization, ElasticAssembler, ElasticForm, Form, MaterialLibrary, Mesh, NewtonResults,
    NewtonSolver,
};
use nalgebra::DVector;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::RunConfig;

fn usage() {
    eprintln!("usage:");
    eprintln!("  ifem-cli run <config.json>");
    eprintln!("  ifem-cli check <config.json>");
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Assembled problem: the form plus the loads and constraints acting on it
struct Problem {
    mesh: Mesh,
    form: ElasticForm,
    f_ext: DVector<f64>,
    fixed: Vec<(usize, f64)>,
}

fn setup(config: &RunConfig) -> Result<Problem, String> {
    let mesh = config
        .mesh
        .build()
        .map_err(|err| format!("mesh: {err}"))?;
    let dim = mesh.dim;
    let library = MaterialLibrary::uniform(config.material.clone());
    let disc = Discretization::build(&mesh, config.order, 1)
        .map_err(|err| format!("discretization: {err}"))?;
    let assembler = ElasticAssembler::from_library(dim, &library, mesh.num_elements())
        .map_err(|err| format!("material: {err}"))?;

    let mut bcs = config.boundary_conditions.clone();
    if config.clamp_min_x {
        let clamped = disc.nodes_where(|p| p[0].abs() < 1e-12);
        bcs.fix_nodes(&clamped, dim);
    }
    let fixed: Vec<(usize, f64)> = bcs
        .constrained_indices(dim, disc.n_bases)
        .map_err(|err| format!("boundary conditions: {err}"))?
        .into_iter()
        .collect();
    let mut f_ext = bcs
        .load_vector(dim, disc.n_bases)
        .map_err(|err| format!("loads: {err}"))?;
    info!("{}", bcs.statistics().format());

    let form = ElasticForm::new(
        disc.n_bases,
        disc.bases,
        disc.geom_bases,
        assembler,
        config.form.clone(),
    )
    .map_err(|err| format!("elastic form: {err}"))?;
    if let Some(gravity) = &bcs.gravity {
        f_ext += form
            .body_force(gravity)
            .map_err(|err| format!("gravity: {err}"))?;
    }

    Ok(Problem {
        mesh,
        form,
        f_ext,
        fixed,
    })
}

fn max_nodal_displacement(x: &DVector<f64>, dim: usize) -> f64 {
    x.as_slice()
        .chunks(dim)
        .map(|u| u.iter().map(|v| v * v).sum::<f64>().sqrt())
        .fold(0.0, f64::max)
}

fn print_results(problem: &Problem, results: &NewtonResults) {
    let x = &results.displacement;
    let dim = problem.form.dim().value();
    println!("status: {:?}", results.status);
    println!("iterations: {}", results.num_iterations);
    println!("residual: {:.6e}", results.residual_norm);
    println!("energy: {:.6e}", problem.form.value(x));
    println!("max_displacement: {:.6e}", max_nodal_displacement(x, dim));
    if let Some(min_step) = results.step_history.iter().copied().reduce(f64::min) {
        println!("min_step: {:.6}", min_step);
    }
    println!("valid: {}", problem.form.is_step_collision_free(x, x));
}

fn run(path: &Path) -> Result<(), String> {
    let config = RunConfig::load(path)?;
    let mut problem = setup(&config)?;
    let solver = NewtonSolver::new(config.newton);
    let results = solver
        .solve_load_steps(&mut problem.form, &problem.f_ext, &problem.fixed)
        .map_err(|err| format!("solve: {err}"))?;
    print_results(&problem, &results);
    Ok(())
}

fn check(path: &Path) -> Result<(), String> {
    let config = RunConfig::load(path)?;
    let problem = setup(&config)?;
    let stats = problem.mesh.statistics();
    println!("dimension: {}", problem.form.dim().value());
    println!("nodes: {}", stats.num_nodes);
    println!("elements: {}", stats.num_elements);
    println!("bases: {}", problem.form.n_bases());
    let points: usize = (0..problem.form.n_elements())
        .map(|e| problem.form.quadrature(e).size())
        .sum();
    println!("quadrature_points: {}", points);
    println!("fixed_dofs: {}", problem.fixed.len());
    println!("load_norm: {:.6e}", problem.f_ext.norm());
    println!("valid: true");
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        usage();
        return ExitCode::from(2);
    }
    init_logging();

    let path = Path::new(&args[2]);
    let outcome = match args[1].as_str() {
        "run" => run(path),
        "check" => check(path),
        _ => {
            usage();
            return ExitCode::from(2);
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}
