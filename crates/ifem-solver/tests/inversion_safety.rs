//! Step-size and refinement behaviour of the elastic form.

use ifem_solver::{
    Dimension, Discretization, ElasticAssembler, ElasticForm, Element, ElementType, FemError,
    Form, FormConfig, LameParameters, MaterialModel, Mesh, Node, evaluate_jacobian,
    simplex_quadrature,
};
use nalgebra::{DMatrix, DVector};

fn unit_triangle() -> Mesh {
    let mut mesh = Mesh::new(Dimension::Two);
    mesh.add_node(Node::planar(0.0, 0.0));
    mesh.add_node(Node::planar(1.0, 0.0));
    mesh.add_node(Node::planar(0.0, 1.0));
    mesh.add_element(Element::new(ElementType::Tri3, vec![0, 1, 2]))
        .unwrap();
    mesh
}

fn build_form(mesh: &Mesh, order: usize) -> ifem_solver::Result<ElasticForm> {
    let disc = Discretization::build(mesh, order, 1)?;
    let n = disc.bases.len();
    let params = vec![LameParameters::from_young_poisson(1000.0, 0.3)?; n];
    let assembler = ElasticAssembler::new(mesh.dim, MaterialModel::NeoHookean, params, vec![1.0; n])?;
    ElasticForm::new(disc.n_bases, disc.bases, disc.geom_bases, assembler, FormConfig::default())
}

fn lerp(x0: &DVector<f64>, x1: &DVector<f64>, t: f64) -> DVector<f64> {
    x0 + (x1 - x0) * t
}

#[test]
fn folding_triangle_stops_before_crossing() {
    let mesh = unit_triangle();
    let mut form = build_form(&mesh, 1).unwrap();
    let x0 = DVector::zeros(6);
    let mut x1 = DVector::zeros(6);
    // top vertex moves through the base edge; det F = 1 - 2t
    x1[5] = -2.0;

    let step = form.max_step_size(&x0, &x1).unwrap();
    assert!(step > 0.0 && step <= 0.5, "step {}", step);
    assert!(form.is_step_collision_free(&x0, &lerp(&x0, &x1, 0.9 * step)));
    assert!(!form.is_step_collision_free(&x0, &lerp(&x0, &x1, 0.5)));
    assert!(!form.is_step_collision_free(&x0, &x1));
}

#[test]
fn zero_update_gives_full_step() {
    let mesh = Mesh::box_mesh([2, 2, 1], [1.0, 1.0, 0.5]).unwrap();
    let mut form = build_form(&mesh, 1).unwrap();
    let x0 = DVector::zeros(form.n_bases() * 3);
    assert_eq!(form.max_step_size(&x0, &x0).unwrap(), 1.0);
    assert!(form.is_step_collision_free(&x0, &x0));
}

#[test]
fn degenerate_end_state_is_never_reached() {
    let mesh = unit_triangle();
    let mut form = build_form(&mesh, 1).unwrap();
    let x0 = DVector::zeros(6);
    let mut x1 = DVector::zeros(6);
    // collapses the triangle exactly at t = 1
    x1[5] = -1.0;

    let step = form.max_step_size(&x0, &x1).unwrap();
    assert!(step < 1.0);
    assert!(step > 0.99);

    let before = lerp(&x0, &x1, step - 1e-3);
    let centroid = DMatrix::from_row_slice(1, 2, &[1.0 / 3.0, 1.0 / 3.0]);
    let disc = Discretization::build(&mesh, 1, 1).unwrap();
    let (_, det) = evaluate_jacobian(&disc.bases[0], &disc.geom_bases[0], &centroid, &before).unwrap();
    assert!(det > 0.0);
}

#[test]
fn negatively_oriented_element_fails_construction() {
    let mut mesh = Mesh::rectangle(2, 2, 1.0, 1.0).unwrap();
    mesh.elements[3].nodes.swap(1, 2);
    let result = build_form(&mesh, 1);
    assert!(
        matches!(result, Err(FemError::InvertedElement { element: 3, .. })),
        "{:?}",
        result.err()
    );
}

#[test]
fn mixed_orders_are_rejected() {
    let mesh = Mesh::rectangle(1, 1, 1.0, 1.0).unwrap();
    let disc = Discretization::build(&mesh, 1, 1).unwrap();
    let p2 = Discretization::build(&mesh, 2, 1).unwrap();
    let mut bases = disc.bases.clone();
    bases[1] = p2.bases[1].clone();
    let params = vec![LameParameters::from_young_poisson(1000.0, 0.3).unwrap(); 2];
    let assembler =
        ElasticAssembler::new(Dimension::Two, MaterialModel::NeoHookean, params, vec![1.0; 2]).unwrap();
    let result = ElasticForm::new(p2.n_bases, bases, disc.geom_bases, assembler, FormConfig::default());
    assert!(matches!(result, Err(FemError::NonUniformOrder { element: 1, .. })));
}

#[test]
fn bounding_element_gets_refined_quadrature_until_finish() {
    let mesh = unit_triangle();
    let mut form = build_form(&mesh, 2).unwrap();
    let n = form.n_bases() * 2;
    let base = simplex_quadrature(Dimension::Two, 3).unwrap();
    assert_eq!(form.quadrature(0).size(), base.size());

    // midpoint of the (1, 2) edge pushed across the opposite corner
    let disc = Discretization::build(&mesh, 2, 1).unwrap();
    let edge_node = disc.bases[0].global[4];
    let x0 = DVector::zeros(n);
    let mut x1 = DVector::zeros(n);
    x1[2 * edge_node] = -1.5;
    x1[2 * edge_node + 1] = -1.5;

    let step = form.max_step_size(&x0, &x1).unwrap();
    assert!(step > 0.0 && step < 0.5, "step {}", step);
    assert!(form.tree(0).depth() > 0);
    assert!(form.quadrature(0).size() > base.size());
    assert!((form.quadrature(0).total_weight() - 0.5).abs() < 1e-12);

    // energy is still integrated consistently on the refined rule
    let x = lerp(&x0, &x1, 0.5 * step);
    let total = form.value(&x);
    let per_element = form.value_per_element(&x).sum();
    assert!((total - per_element).abs() <= 1e-10 * total.abs().max(1.0));

    form.finish();
    assert_eq!(form.tree(0).depth(), 0);
    assert_eq!(form.tree(0).n_leaves(), 1);
    assert_eq!(form.quadrature(0).size(), base.size());

    // a second refinement, then repeated resets
    let again = form.max_step_size(&x0, &x1).unwrap();
    assert!((again - step).abs() < 1e-12);
    assert!(form.tree(0).depth() > 0);
    for _ in 0..2 {
        form.finish();
        assert_eq!(form.tree(0).depth(), 0);
        assert_eq!(form.tree(0).n_leaves(), 1);
        assert_eq!(form.quadrature(0).size(), base.size());
    }
}

#[test]
fn energy_matches_per_element_sum() {
    let mesh = Mesh::box_mesh([2, 1, 1], [2.0, 1.0, 1.0]).unwrap();
    let form = build_form(&mesh, 2).unwrap();
    let n = form.n_bases() * 3;
    let x = DVector::from_fn(n, |i, _| 0.002 * ((i % 7) as f64 - 3.0));
    let total = form.value(&x);
    let per_element = form.value_per_element(&x);
    assert_eq!(per_element.len(), form.n_elements());
    assert!(total > 0.0);
    assert!((total - per_element.sum()).abs() <= 1e-10 * total);
}

#[test]
fn refined_mesh_follows_displacement() {
    let mesh = unit_triangle();
    let form = build_form(&mesh, 1).unwrap();
    let x = DVector::from_vec(vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    let (points, cells) = form.refined_mesh(&x, Some(0)).unwrap();
    assert_eq!(cells, vec![vec![0, 1, 2]]);
    assert!((points[(0, 0)] - 1.0).abs() < 1e-14);
    assert!((points[(0, 1)] - 2.0).abs() < 1e-14);
    assert!((points[(2, 1)] - 3.0).abs() < 1e-14);
}
