//! Lagrange bases on triangles and tetrahedra.
//!
//! Shape functions are written in barycentric coordinates
//! `λ0 = 1 - ξ - η (- ζ)`, `λ(k+1) = ξ_k`.
//!
//! Local node order is corners first, then edge midpoints:
//!
//! ```text
//! 2D edges: 3 (0-1), 4 (1-2), 5 (2-0)
//! 3D edges: 4 (0-1), 5 (1-2), 6 (2-0), 7 (0-3), 8 (1-3), 9 (2-3)
//! ```
//!
//! The geometric map always uses the P1 basis on the mesh vertices.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector, RowDVector};

use crate::dimension::Dimension;
use crate::error::{FemError, Result};
use crate::mesh::Mesh;
use crate::quadrature::{Quadrature, simplex_quadrature};

const TRI_EDGES: [(usize, usize); 3] = [(0, 1), (1, 2), (2, 0)];
const TET_EDGES: [(usize, usize); 6] = [(0, 1), (1, 2), (2, 0), (0, 3), (1, 3), (2, 3)];

/// Local edges of a simplex in basis-node order
pub fn local_edges(dim: Dimension) -> &'static [(usize, usize)] {
    match dim {
        Dimension::Two => &TRI_EDGES,
        Dimension::Three => &TET_EDGES,
    }
}

/// Number of Lagrange nodes on one element
pub fn n_local_bases(dim: Dimension, order: usize) -> Result<usize> {
    match order {
        1 => Ok(dim.n_vertices()),
        2 => Ok(dim.n_vertices() + local_edges(dim).len()),
        other => Err(FemError::UnsupportedOrder(other)),
    }
}

fn barycentric(point: &[f64]) -> Vec<f64> {
    let mut lambda = Vec::with_capacity(point.len() + 1);
    lambda.push(1.0 - point.iter().sum::<f64>());
    lambda.extend_from_slice(point);
    lambda
}

/// Reference gradient of barycentric coordinate `k`
fn barycentric_gradient(dim: usize, k: usize) -> RowDVector<f64> {
    if k == 0 {
        RowDVector::from_element(dim, -1.0)
    } else {
        let mut g = RowDVector::zeros(dim);
        g[k - 1] = 1.0;
        g
    }
}

/// Shape function values at one reference point.
pub fn shape_values(dim: Dimension, order: usize, point: &[f64]) -> Result<DVector<f64>> {
    let n = n_local_bases(dim, order)?;
    let l = barycentric(point);
    let mut values = DVector::zeros(n);
    let nv = dim.n_vertices();
    if order == 1 {
        for i in 0..nv {
            values[i] = l[i];
        }
    } else {
        for i in 0..nv {
            values[i] = l[i] * (2.0 * l[i] - 1.0);
        }
        for (k, &(a, b)) in local_edges(dim).iter().enumerate() {
            values[nv + k] = 4.0 * l[a] * l[b];
        }
    }
    Ok(values)
}

/// Shape function reference gradients at one point, one row per basis.
pub fn shape_gradients(dim: Dimension, order: usize, point: &[f64]) -> Result<DMatrix<f64>> {
    let n = n_local_bases(dim, order)?;
    let d = dim.value();
    let l = barycentric(point);
    let nv = dim.n_vertices();
    let grad_l: Vec<RowDVector<f64>> = (0..nv).map(|k| barycentric_gradient(d, k)).collect();

    let mut grads = DMatrix::zeros(n, d);
    if order == 1 {
        for i in 0..nv {
            grads.set_row(i, &grad_l[i]);
        }
    } else {
        for i in 0..nv {
            grads.set_row(i, &(&grad_l[i] * (4.0 * l[i] - 1.0)));
        }
        for (k, &(a, b)) in local_edges(dim).iter().enumerate() {
            let g = (&grad_l[a] * l[b] + &grad_l[b] * l[a]) * 4.0;
            grads.set_row(nv + k, &g);
        }
    }
    Ok(grads)
}

/// Reference coordinates of the Lagrange nodes, one row per node.
pub fn reference_nodes(dim: Dimension, order: usize) -> Result<DMatrix<f64>> {
    let n = n_local_bases(dim, order)?;
    let corners = dim.reference_vertices();
    let mut nodes = DMatrix::zeros(n, dim.value());
    nodes.rows_mut(0, dim.n_vertices()).copy_from(&corners);
    if order == 2 {
        for (k, &(a, b)) in local_edges(dim).iter().enumerate() {
            let mid = (corners.row(a) + corners.row(b)) * 0.5;
            nodes.set_row(dim.n_vertices() + k, &mid);
        }
    }
    Ok(nodes)
}

/// Per-element basis descriptor.
#[derive(Debug, Clone)]
pub struct ElementBasis {
    /// Element index in the mesh
    pub element: usize,
    pub dim: Dimension,
    /// Lagrange order (1 or 2)
    pub order: usize,
    /// Global basis index of every local node
    pub global: Vec<usize>,
    /// Rest positions of the local nodes, one row per node
    pub nodes: DMatrix<f64>,
    /// Integration rule in reference coordinates
    pub quadrature: Quadrature,
}

impl ElementBasis {
    pub fn n_bases(&self) -> usize {
        self.global.len()
    }

    /// Shape values at `points` (rows), shape `(n_points, n_bases)`.
    pub fn values(&self, points: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let mut out = DMatrix::zeros(points.nrows(), self.n_bases());
        for p in 0..points.nrows() {
            let point: Vec<f64> = points.row(p).iter().copied().collect();
            out.set_row(p, &shape_values(self.dim, self.order, &point)?.transpose());
        }
        Ok(out)
    }

    /// Reference gradients at `points`, one `(n_bases, dim)` matrix per point.
    pub fn gradients(&self, points: &DMatrix<f64>) -> Result<Vec<DMatrix<f64>>> {
        (0..points.nrows())
            .map(|p| {
                let point: Vec<f64> = points.row(p).iter().copied().collect();
                shape_gradients(self.dim, self.order, &point)
            })
            .collect()
    }

    /// Local coefficients of a global field, shape `(n_bases, dim)`.
    pub fn local_coefficients(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let d = self.dim.value();
        DMatrix::from_fn(self.n_bases(), d, |j, c| x[self.global[j] * d + c])
    }

    /// Field interpolated at `points`, one row per point.
    pub fn interpolate(&self, points: &DMatrix<f64>, x: &DVector<f64>) -> Result<DMatrix<f64>> {
        Ok(self.values(points)? * self.local_coefficients(x))
    }

    /// Rest positions of `points` under this basis' node positions.
    pub fn map_points(&self, points: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        Ok(self.values(points)? * &self.nodes)
    }

    pub fn set_quadrature(&mut self, quadrature: Quadrature) {
        self.quadrature = quadrature;
    }
}

/// Displacement and geometric bases of a whole mesh.
#[derive(Debug, Clone)]
pub struct Discretization {
    pub dim: Dimension,
    /// Number of global displacement bases (nodes)
    pub n_bases: usize,
    pub bases: Vec<ElementBasis>,
    pub geom_bases: Vec<ElementBasis>,
    /// Rest position of every global basis node, one row per node
    pub nodes: DMatrix<f64>,
}

impl Discretization {
    /// Build order-`order` Lagrange bases on `mesh`.
    ///
    /// Vertex nodes keep their mesh index; P2 edge nodes are numbered after
    /// all vertices in order of first appearance.
    pub fn build(mesh: &Mesh, order: usize, quadrature_order: usize) -> Result<Self> {
        mesh.validate()?;
        let dim = mesh.dim;
        let d = dim.value();
        n_local_bases(dim, order)?;
        let quadrature = simplex_quadrature(dim, quadrature_order)?;
        let n_vertices = mesh.num_nodes();

        let mut edge_index: HashMap<(usize, usize), usize> = HashMap::new();
        let mut positions: Vec<[f64; 3]> = mesh.nodes.iter().map(|n| n.coords()).collect();
        let mut bases = Vec::with_capacity(mesh.num_elements());
        let mut geom_bases = Vec::with_capacity(mesh.num_elements());

        for (e, element) in mesh.elements.iter().enumerate() {
            let corners = &element.nodes;
            let mut global = corners.clone();
            if order == 2 {
                for &(a, b) in local_edges(dim) {
                    let key = (corners[a].min(corners[b]), corners[a].max(corners[b]));
                    let next = n_vertices + edge_index.len();
                    let id = *edge_index.entry(key).or_insert_with(|| {
                        let pa = mesh.nodes[key.0].coords();
                        let pb = mesh.nodes[key.1].coords();
                        positions.push([
                            0.5 * (pa[0] + pb[0]),
                            0.5 * (pa[1] + pb[1]),
                            0.5 * (pa[2] + pb[2]),
                        ]);
                        next
                    });
                    global.push(id);
                }
            }

            let node_matrix = |ids: &[usize], pos: &[[f64; 3]]| {
                DMatrix::from_fn(ids.len(), d, |r, c| pos[ids[r]][c])
            };

            geom_bases.push(ElementBasis {
                element: e,
                dim,
                order: 1,
                global: corners.clone(),
                nodes: node_matrix(corners, &positions),
                quadrature: quadrature.clone(),
            });
            bases.push(ElementBasis {
                element: e,
                dim,
                order,
                nodes: node_matrix(&global, &positions),
                global,
                quadrature: quadrature.clone(),
            });
        }

        let n_bases = positions.len();
        let nodes = DMatrix::from_fn(n_bases, d, |r, c| positions[r][c]);
        Ok(Self {
            dim,
            n_bases,
            bases,
            geom_bases,
            nodes,
        })
    }

    /// Number of scalar degrees of freedom
    pub fn n_dofs(&self) -> usize {
        self.n_bases * self.dim.value()
    }

    /// Rest positions flattened node-major, matching the displacement layout
    pub fn rest_positions(&self) -> DVector<f64> {
        let d = self.dim.value();
        DVector::from_fn(self.n_dofs(), |i, _| self.nodes[(i / d, i % d)])
    }

    /// Global basis nodes whose rest position satisfies `predicate`
    pub fn nodes_where(&self, predicate: impl Fn(&[f64]) -> bool) -> Vec<usize> {
        (0..self.n_bases)
            .filter(|&i| {
                let p: Vec<f64> = self.nodes.row(i).iter().copied().collect();
                predicate(&p)
            })
            .collect()
    }
}
