//! Inversion-safe nonlinear elasticity on simplicial meshes.
//!
//! The central piece is [`ElasticForm`], an energy term that, besides value,
//! gradient and Hessian, answers how far a proposed displacement update can
//! be followed before any element inverts anywhere in its interior. Elements
//! that bound a step get their quadrature refined over a red subdivision of
//! the reference simplex.
//!
//! The remaining modules supply what the form needs to run end to end:
//! meshes, P1/P2 Lagrange bases, quadrature rules, constitutive laws and a
//! Newton driver consuming the [`Form`] contract.

pub mod assembler;
pub mod assembly_values;
pub mod basis;
pub mod boundary_conditions;
pub mod constitutive;
pub mod dimension;
pub mod elastic_form;
pub mod error;
pub mod form;
pub mod interval;
pub mod jacobian;
pub mod materials;
pub mod mesh;
pub mod newton;
pub mod parallel;
pub mod quadrature;
pub mod refinement;
pub mod sparse_cache;
pub mod step_size;

pub use assembler::{ElasticAssembler, project_to_psd};
pub use assembly_values::{AssemblyValsCache, ElementAssemblyValues};
pub use basis::{Discretization, ElementBasis};
pub use boundary_conditions::{
    BCStatistics, BoundaryConditions, ConcentratedLoad, DisplacementBC, DofId,
};
pub use constitutive::{ConstitutiveLaw, LinearElasticity, NeoHookean, law_for};
pub use dimension::Dimension;
pub use elastic_form::{ElasticForm, ElementInversionCheck, FormConfig, QuadratureRefinement};
pub use error::{FemError, Result};
pub use form::Form;
pub use interval::Interval;
pub use jacobian::{JacobianField, evaluate_jacobian};
pub use materials::{LameParameters, Material, MaterialLibrary, MaterialModel};
pub use mesh::{Element, ElementType, Mesh, MeshStatistics, Node};
pub use newton::{ConvergenceStatus, NewtonConfig, NewtonResults, NewtonSolver};
pub use quadrature::{Quadrature, quadrature_order, refine_quadrature, simplex_quadrature};
pub use refinement::{SubSimplex, SubdivisionTree, TreeNode};
pub use sparse_cache::SparseMatrixCache;
pub use step_size::{StepSizeConfig, StepSizeResult, ValidityRecord, is_valid, max_time_step};
