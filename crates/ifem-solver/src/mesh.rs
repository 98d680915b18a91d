//! Simplicial mesh data structures.
//!
//! Nodes and elements are stored in vectors and addressed by 0-based index.
//! Only linear triangles and tetrahedra are stored; higher-order nodes are
//! generated by the basis builder from the element edges.

use std::collections::HashMap;

use nalgebra::DMatrix;

use crate::dimension::Dimension;
use crate::error::{FemError, Result};

/// A node in the finite element mesh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate (0 for planar meshes)
    pub z: f64,
}

impl Node {
    /// Create a new node
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Planar node
    pub fn planar(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    /// Get coordinates as an array
    pub fn coords(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// Element type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// 3-node triangle
    Tri3,
    /// 4-node tetrahedron
    Tet4,
}

impl ElementType {
    /// Get the number of nodes for this element type
    pub fn num_nodes(&self) -> usize {
        match self {
            ElementType::Tri3 => 3,
            ElementType::Tet4 => 4,
        }
    }

    /// Element type used for simplices of the given dimension
    pub fn for_dimension(dim: Dimension) -> Self {
        match dim {
            Dimension::Two => ElementType::Tri3,
            Dimension::Three => ElementType::Tet4,
        }
    }

    pub fn dimension(&self) -> Dimension {
        match self {
            ElementType::Tri3 => Dimension::Two,
            ElementType::Tet4 => Dimension::Three,
        }
    }
}

/// An element in the finite element mesh
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Element type
    pub element_type: ElementType,
    /// Node connectivity (node indices)
    pub nodes: Vec<usize>,
}

impl Element {
    /// Create a new element
    pub fn new(element_type: ElementType, nodes: Vec<usize>) -> Self {
        Self {
            element_type,
            nodes,
        }
    }

    /// Validate that the element has the correct number of distinct nodes
    pub fn validate(&self) -> Result<()> {
        let expected = self.element_type.num_nodes();
        let actual = self.nodes.len();
        if actual != expected {
            return Err(FemError::InvalidMesh(format!(
                "element of type {:?} has {} nodes but expected {}",
                self.element_type, actual, expected
            )));
        }
        for (i, a) in self.nodes.iter().enumerate() {
            if self.nodes[i + 1..].contains(a) {
                return Err(FemError::InvalidMesh(format!(
                    "element repeats node {a}"
                )));
            }
        }
        Ok(())
    }
}

/// Complete simplicial mesh
#[derive(Debug, Clone)]
pub struct Mesh {
    /// Spatial dimension
    pub dim: Dimension,
    /// All nodes, by index
    pub nodes: Vec<Node>,
    /// All elements, by index
    pub elements: Vec<Element>,
}

impl Mesh {
    /// Create a new empty mesh
    pub fn new(dim: Dimension) -> Self {
        Self {
            dim,
            nodes: Vec::new(),
            elements: Vec::new(),
        }
    }

    /// Add a node to the mesh and return its index
    pub fn add_node(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Add an element to the mesh and return its index
    pub fn add_element(&mut self, element: Element) -> Result<usize> {
        element.validate()?;
        if element.element_type.dimension() != self.dim {
            return Err(FemError::InvalidMesh(format!(
                "{:?} element in a {}D mesh",
                element.element_type,
                self.dim.value()
            )));
        }
        self.elements.push(element);
        Ok(self.elements.len() - 1)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// Validate the mesh
    pub fn validate(&self) -> Result<()> {
        // Check that all element nodes exist
        for (elem_id, element) in self.elements.iter().enumerate() {
            for &node_id in &element.nodes {
                if node_id >= self.nodes.len() {
                    return Err(FemError::InvalidMesh(format!(
                        "Element {} references non-existent node {}",
                        elem_id, node_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Corner coordinates of an element, one row per corner.
    pub fn element_vertices(&self, element: usize) -> DMatrix<f64> {
        let dim = self.dim.value();
        let nodes = &self.elements[element].nodes;
        DMatrix::from_fn(nodes.len(), dim, |r, c| self.nodes[nodes[r]].coords()[c])
    }

    /// Signed measure of an element; negative for inverted orientation.
    pub fn signed_volume(&self, element: usize) -> f64 {
        let v = self.element_vertices(element);
        let dim = self.dim.value();
        let edges = DMatrix::from_fn(dim, dim, |r, c| v[(c + 1, r)] - v[(0, r)]);
        edges.determinant() * self.dim.reference_volume()
    }

    /// Indices of nodes whose coordinates satisfy `predicate`
    pub fn nodes_where(&self, predicate: impl Fn(&Node) -> bool) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| predicate(n))
            .map(|(i, _)| i)
            .collect()
    }

    /// Structured triangulation of `[0, width] x [0, height]`.
    ///
    /// Every cell is split into two counter-clockwise triangles.
    pub fn rectangle(nx: usize, ny: usize, width: f64, height: f64) -> Result<Self> {
        if nx == 0 || ny == 0 || !(width > 0.0) || !(height > 0.0) {
            return Err(FemError::InvalidMesh(format!(
                "rectangle needs positive cell counts and size, got {nx}x{ny} of {width}x{height}"
            )));
        }
        let mut mesh = Self::new(Dimension::Two);
        for j in 0..=ny {
            for i in 0..=nx {
                mesh.add_node(Node::planar(
                    width * i as f64 / nx as f64,
                    height * j as f64 / ny as f64,
                ));
            }
        }
        let id = |i: usize, j: usize| j * (nx + 1) + i;
        for j in 0..ny {
            for i in 0..nx {
                let (n00, n10, n01, n11) = (id(i, j), id(i + 1, j), id(i, j + 1), id(i + 1, j + 1));
                mesh.add_element(Element::new(ElementType::Tri3, vec![n00, n10, n11]))?;
                mesh.add_element(Element::new(ElementType::Tri3, vec![n00, n11, n01]))?;
            }
        }
        Ok(mesh)
    }

    /// Structured tetrahedralization of `[0, lx] x [0, ly] x [0, lz]`.
    ///
    /// Every hexahedral cell is split into six tetrahedra sharing the main
    /// diagonal, all positively oriented.
    pub fn box_mesh(cells: [usize; 3], size: [f64; 3]) -> Result<Self> {
        let [nx, ny, nz] = cells;
        if cells.contains(&0) || size.iter().any(|&s| !(s > 0.0)) {
            return Err(FemError::InvalidMesh(format!(
                "box needs positive cell counts and size, got {cells:?} of {size:?}"
            )));
        }
        let mut mesh = Self::new(Dimension::Three);
        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    mesh.add_node(Node::new(
                        size[0] * i as f64 / nx as f64,
                        size[1] * j as f64 / ny as f64,
                        size[2] * k as f64 / nz as f64,
                    ));
                }
            }
        }
        let id = |i: usize, j: usize, k: usize| (k * (ny + 1) + j) * (nx + 1) + i;
        const PERMUTATIONS: [[usize; 3]; 6] =
            [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    for perm in PERMUTATIONS {
                        // walk from the low corner to the high corner one axis at a time
                        let mut offset = [0usize; 3];
                        let mut nodes = vec![id(i, j, k)];
                        for axis in perm {
                            offset[axis] = 1;
                            nodes.push(id(i + offset[0], j + offset[1], k + offset[2]));
                        }
                        let e = mesh.add_element(Element::new(ElementType::Tet4, nodes))?;
                        if mesh.signed_volume(e) < 0.0 {
                            mesh.elements[e].nodes.swap(2, 3);
                        }
                    }
                }
            }
        }
        Ok(mesh)
    }

    /// Get mesh statistics
    pub fn statistics(&self) -> MeshStatistics {
        let mut element_type_counts = HashMap::new();
        for element in &self.elements {
            *element_type_counts.entry(element.element_type).or_insert(0) += 1;
        }

        MeshStatistics {
            num_nodes: self.nodes.len(),
            num_elements: self.elements.len(),
            num_dofs: self.nodes.len() * self.dim.value(),
            element_type_counts,
        }
    }
}

/// Mesh statistics for reporting
#[derive(Debug, Clone)]
pub struct MeshStatistics {
    /// Total number of nodes
    pub num_nodes: usize,
    /// Total number of elements
    pub num_elements: usize,
    /// Degrees of freedom of the linear discretization
    pub num_dofs: usize,
    /// Count of each element type
    pub element_type_counts: HashMap<ElementType, usize>,
}

impl MeshStatistics {
    /// Format as a human-readable string
    pub fn format(&self) -> String {
        let mut lines = vec![
            format!("Nodes: {}", self.num_nodes),
            format!("Elements: {}", self.num_elements),
            format!("DOFs: {}", self.num_dofs),
        ];

        if !self.element_type_counts.is_empty() {
            lines.push("Element types:".to_string());
            let mut types: Vec<_> = self.element_type_counts.iter().collect();
            types.sort_by_key(|(k, _)| format!("{:?}", k));
            for (elem_type, count) in types {
                lines.push(format!("  {:?}: {}", elem_type, count));
            }
        }

        lines.join("\n")
    }
}
