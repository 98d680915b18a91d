//! Error types for ifem-solver

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FemError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FemError {
    #[error("Element {element} is inverted (min jacobian determinant {min_det:.3e})")]
    InvertedElement { element: usize, min_det: f64 },

    #[error("Non-uniform {kind} order: expected {expected}, found {found} on element {element}")]
    NonUniformOrder {
        kind: &'static str,
        expected: usize,
        found: usize,
        element: usize,
    },

    #[error("Unsupported basis order: {0}")]
    UnsupportedOrder(usize),

    #[error("No quadrature rule of order {order} for dimension {dim}")]
    UnsupportedQuadratureOrder { dim: usize, order: usize },

    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),

    #[error("Invalid material: {0}")]
    InvalidMaterial(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Singular system: {0}")]
    SingularSystem(String),

    #[error("Newton did not converge after {iterations} iterations (gradient norm {residual:.3e})")]
    NotConverged { iterations: usize, residual: f64 },

    #[error("Sparse pattern error: {0}")]
    SparsePattern(String),
}
