//! Regular (red) subdivision of the reference simplex.
//!
//! Each refinement step splits a triangle into 4 and a tetrahedron into 8
//! congruent children by inserting edge midpoints. The same hierarchy drives
//! two consumers:
//!
//! - the quadrature refiner, which places a copy of the base rule in every
//!   leaf, and
//! - the continuous step-size search, which bounds the Jacobian determinant
//!   over sub-simplices.
//!
//! ## Child layout
//!
//! ```text
//!  2D                      3D
//!  2                       children 0-3: corner tetrahedra
//!  |\                      children 4-7: the inner octahedron split along
//!  | \                                   the diagonal joining the midpoints
//!  |2 \                                  of edges (0,1) and (2,3)
//!  |---\
//!  |\ 3|\
//!  |0\ |1\
//!  0--\---1
//! ```
//!
//! Trees are stored as arenas: a node is an index, and the children of a node
//! occupy a contiguous index range. Nodes are never removed except by
//! [`SubdivisionTree::reset`].

use nalgebra::{DMatrix, RowDVector};

use crate::dimension::Dimension;

/// Corners of the 2D children in the parent's reference coordinates.
const TRI_CHILDREN: [[[f64; 2]; 3]; 4] = [
    [[0.0, 0.0], [0.5, 0.0], [0.0, 0.5]],
    [[0.5, 0.0], [1.0, 0.0], [0.5, 0.5]],
    [[0.0, 0.5], [0.5, 0.5], [0.0, 1.0]],
    [[0.5, 0.5], [0.0, 0.5], [0.5, 0.0]],
];

/// Corners of the 3D children in the parent's reference coordinates.
const TET_CHILDREN: [[[f64; 3]; 4]; 8] = [
    [[0.0, 0.0, 0.0], [0.5, 0.0, 0.0], [0.0, 0.5, 0.0], [0.0, 0.0, 0.5]],
    [[0.5, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 0.5, 0.0], [0.5, 0.0, 0.5]],
    [[0.0, 0.5, 0.0], [0.5, 0.5, 0.0], [0.0, 1.0, 0.0], [0.0, 0.5, 0.5]],
    [[0.0, 0.0, 0.5], [0.5, 0.0, 0.5], [0.0, 0.5, 0.5], [0.0, 0.0, 1.0]],
    [[0.5, 0.0, 0.0], [0.5, 0.0, 0.5], [0.0, 0.5, 0.5], [0.0, 0.0, 0.5]],
    [[0.5, 0.0, 0.0], [0.5, 0.5, 0.0], [0.0, 0.5, 0.5], [0.5, 0.0, 0.5]],
    [[0.0, 0.5, 0.0], [0.5, 0.0, 0.0], [0.5, 0.5, 0.0], [0.0, 0.5, 0.5]],
    [[0.0, 0.0, 0.5], [0.5, 0.0, 0.0], [0.0, 0.5, 0.0], [0.0, 0.5, 0.5]],
];

/// Reference-coordinate corners of child `i`, one row per corner.
pub fn child_corners(dim: Dimension, i: usize) -> DMatrix<f64> {
    assert!(
        i < dim.n_children(),
        "child index {i} out of range for {dim:?}"
    );
    match dim {
        Dimension::Two => DMatrix::from_fn(3, 2, |r, c| TRI_CHILDREN[i][r][c]),
        Dimension::Three => DMatrix::from_fn(4, 3, |r, c| TET_CHILDREN[i][r][c]),
    }
}

/// Barycentric weights of reference points (rows of `points`).
///
/// Column 0 holds the weight of the origin corner, column `k + 1` the
/// weight of the corner on axis `k`.
pub fn barycentric(points: &DMatrix<f64>) -> DMatrix<f64> {
    let dim = points.ncols();
    let mut weights = DMatrix::zeros(points.nrows(), dim + 1);
    for r in 0..points.nrows() {
        let mut sum = 0.0;
        for c in 0..dim {
            weights[(r, c + 1)] = points[(r, c)];
            sum += points[(r, c)];
        }
        weights[(r, 0)] = 1.0 - sum;
    }
    weights
}

/// A sub-simplex of the reference element, produced by `level` refinements.
#[derive(Debug, Clone, PartialEq)]
pub struct SubSimplex {
    /// Corner coordinates in the root reference frame, one row per corner
    pub corners: DMatrix<f64>,
    /// Number of refinement steps from the root
    pub level: usize,
}

impl SubSimplex {
    /// The whole reference simplex
    pub fn reference(dim: Dimension) -> Self {
        Self {
            corners: dim.reference_vertices(),
            level: 0,
        }
    }

    /// Child `i` of this sub-simplex under red refinement.
    pub fn child(&self, dim: Dimension, i: usize) -> Self {
        let weights = barycentric(&child_corners(dim, i));
        Self {
            corners: weights * &self.corners,
            level: self.level + 1,
        }
    }

    /// Map points given in reference coordinates into this sub-simplex.
    pub fn map_points(&self, points: &DMatrix<f64>) -> DMatrix<f64> {
        barycentric(points) * &self.corners
    }

    /// Arithmetic mean of the corners
    pub fn centroid(&self) -> RowDVector<f64> {
        let n = self.corners.nrows() as f64;
        self.corners.row_sum() / n
    }

    /// Ratio between the measure of this sub-simplex and the root.
    pub fn volume_ratio(&self, dim: Dimension) -> f64 {
        0.5f64.powi((dim.value() * self.level) as i32)
    }
}

/// Read-only view of one node of a [`SubdivisionTree`].
#[derive(Debug, Clone, Copy)]
pub struct TreeNode<'a> {
    tree: &'a SubdivisionTree,
    index: usize,
}

impl<'a> TreeNode<'a> {
    /// Arena index of this node
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn has_children(&self) -> bool {
        self.tree.first_child[self.index].is_some()
    }

    pub fn n_children(&self) -> usize {
        self.tree.dim.n_children()
    }

    /// Child `i` of this node.
    ///
    /// # Panics
    /// Panics if the node is a leaf or `i >= n_children()`.
    pub fn child(&self, i: usize) -> TreeNode<'a> {
        assert!(i < self.n_children(), "child index {i} out of range");
        let first = self.tree.first_child[self.index]
            .unwrap_or_else(|| panic!("node {} is a leaf", self.index));
        TreeNode {
            tree: self.tree,
            index: first + i,
        }
    }

    /// Depth of the subtree rooted here (0 for a leaf)
    pub fn depth(&self) -> usize {
        match self.tree.first_child[self.index] {
            None => 0,
            Some(first) => {
                1 + (0..self.n_children())
                    .map(|i| self.tree.node(first + i).depth())
                    .max()
                    .unwrap_or(0)
            }
        }
    }

    /// Number of leaves below this node
    pub fn n_leaves(&self) -> usize {
        match self.tree.first_child[self.index] {
            None => 1,
            Some(first) => (0..self.n_children())
                .map(|i| self.tree.node(first + i).n_leaves())
                .sum(),
        }
    }
}

/// Per-element refinement hierarchy of the reference simplex.
#[derive(Debug, Clone, PartialEq)]
pub struct SubdivisionTree {
    dim: Dimension,
    /// Arena index of each node's first child; children are contiguous.
    first_child: Vec<Option<usize>>,
}

impl SubdivisionTree {
    /// Arena index of the root node
    pub const ROOT: usize = 0;

    /// A tree consisting of a single leaf
    pub fn new(dim: Dimension) -> Self {
        Self {
            dim,
            first_child: vec![None],
        }
    }

    pub fn dim(&self) -> Dimension {
        self.dim
    }

    pub fn root(&self) -> TreeNode<'_> {
        self.node(Self::ROOT)
    }

    /// View of the node stored at `index`.
    pub fn node(&self, index: usize) -> TreeNode<'_> {
        assert!(index < self.first_child.len(), "node {index} not in tree");
        TreeNode { tree: self, index }
    }

    pub fn has_children(&self) -> bool {
        self.root().has_children()
    }

    pub fn n_children(&self) -> usize {
        self.dim.n_children()
    }

    pub fn child(&self, i: usize) -> TreeNode<'_> {
        self.root().child(i)
    }

    pub fn depth(&self) -> usize {
        self.root().depth()
    }

    pub fn n_leaves(&self) -> usize {
        self.root().n_leaves()
    }

    /// Total number of nodes stored in the arena
    pub fn n_nodes(&self) -> usize {
        self.first_child.len()
    }

    /// Split a leaf into its children and return the index of the first
    /// child. Subdividing a node that already has children is a no-op.
    pub fn subdivide(&mut self, node: usize) -> usize {
        if let Some(first) = self.first_child[node] {
            return first;
        }
        let first = self.first_child.len();
        self.first_child
            .extend(std::iter::repeat_n(None, self.dim.n_children()));
        self.first_child[node] = Some(first);
        first
    }

    /// Union with `other`, keeping the deeper subtree at every node.
    ///
    /// Returns `true` if this tree gained nodes.
    pub fn merge(&mut self, other: &SubdivisionTree) -> bool {
        assert_eq!(self.dim, other.dim, "cannot merge trees of different dimension");
        self.merge_node(Self::ROOT, other, Self::ROOT)
    }

    fn merge_node(&mut self, node: usize, other: &SubdivisionTree, other_node: usize) -> bool {
        let Some(other_first) = other.first_child[other_node] else {
            return false;
        };

        let mut changed = false;
        let first = match self.first_child[node] {
            Some(first) => first,
            None => {
                changed = true;
                self.subdivide(node)
            }
        };

        for i in 0..self.dim.n_children() {
            changed |= self.merge_node(first + i, other, other_first + i);
        }
        changed
    }

    /// Collapse back to a single leaf.
    pub fn reset(&mut self) {
        self.first_child.clear();
        self.first_child.push(None);
    }

    /// Every leaf as a sub-simplex of the root, in depth-first child order.
    pub fn leaves(&self) -> Vec<SubSimplex> {
        let mut out = Vec::with_capacity(self.n_leaves());
        self.collect_leaves(Self::ROOT, SubSimplex::reference(self.dim), &mut out);
        out
    }

    fn collect_leaves(&self, node: usize, simplex: SubSimplex, out: &mut Vec<SubSimplex>) {
        match self.first_child[node] {
            None => out.push(simplex),
            Some(first) => {
                for i in 0..self.dim.n_children() {
                    self.collect_leaves(first + i, simplex.child(self.dim, i), out);
                }
            }
        }
    }
}
