//! Boundary conditions and loading.
//!
//! This module handles:
//! - Prescribed displacements on global basis nodes
//! - Concentrated nodal loads
//! - Uniform gravity acting on the material density

use std::collections::{BTreeMap, HashMap};

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::dimension::Dimension;
use crate::error::{FemError, Result};

/// Degree of freedom of a basis node (0-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DofId {
    /// Global basis node
    pub node: usize,
    /// Component (0 = X, 1 = Y, 2 = Z)
    pub dof: usize,
}

impl DofId {
    pub fn new(node: usize, dof: usize) -> Self {
        Self { node, dof }
    }

    /// Position in a node-major displacement vector
    pub fn global_index(&self, dim: Dimension) -> Result<usize> {
        if self.dof >= dim.value() {
            return Err(FemError::InvalidConfig(format!(
                "DOF {} of node {} exceeds dimension {}",
                self.dof + 1,
                self.node,
                dim.value()
            )));
        }
        Ok(self.node * dim.value() + self.dof)
    }
}

/// A displacement boundary condition on a range of components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplacementBC {
    pub node: usize,
    /// First component to constrain (1-based)
    pub first_dof: usize,
    /// Last component to constrain (1-based, inclusive)
    pub last_dof: usize,
    /// Prescribed displacement at full load
    #[serde(default)]
    pub value: f64,
}

impl DisplacementBC {
    pub fn new(node: usize, first_dof: usize, last_dof: usize, value: f64) -> Self {
        Self {
            node,
            first_dof,
            last_dof,
            value,
        }
    }

    /// Clamp every component of `node`
    pub fn fixed(node: usize, dim: Dimension) -> Self {
        Self::new(node, 1, dim.value(), 0.0)
    }

    /// All DOF IDs affected by this boundary condition (0-based)
    pub fn affected_dofs(&self) -> Vec<DofId> {
        (self.first_dof.max(1)..=self.last_dof)
            .map(|dof| DofId::new(self.node, dof - 1))
            .collect()
    }
}

/// A concentrated load on one node component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentratedLoad {
    pub node: usize,
    /// Loaded component (1-based)
    pub dof: usize,
    pub magnitude: f64,
}

impl ConcentratedLoad {
    pub fn new(node: usize, dof: usize, magnitude: f64) -> Self {
        Self {
            node,
            dof,
            magnitude,
        }
    }

    /// DOF ID of this load (0-based)
    pub fn dof_id(&self) -> DofId {
        DofId::new(self.node, self.dof.saturating_sub(1))
    }
}

/// Constraints and loads of one analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryConditions {
    pub displacement_bcs: Vec<DisplacementBC>,
    pub concentrated_loads: Vec<ConcentratedLoad>,
    /// Body acceleration, one component per dimension
    pub gravity: Option<Vec<f64>>,
}

impl BoundaryConditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_displacement_bc(&mut self, bc: DisplacementBC) {
        self.displacement_bcs.push(bc);
    }

    pub fn add_concentrated_load(&mut self, load: ConcentratedLoad) {
        self.concentrated_loads.push(load);
    }

    /// Clamp every component of each node in `nodes`
    pub fn fix_nodes(&mut self, nodes: &[usize], dim: Dimension) {
        self.displacement_bcs
            .extend(nodes.iter().map(|&n| DisplacementBC::fixed(n, dim)));
    }

    /// Constrained DOFs (DOF -> prescribed value); later entries win
    pub fn get_constrained_dofs(&self) -> HashMap<DofId, f64> {
        let mut constrained = HashMap::new();
        for bc in &self.displacement_bcs {
            for dof_id in bc.affected_dofs() {
                constrained.insert(dof_id, bc.value);
            }
        }
        constrained
    }

    /// Constrained global DOF indices with their prescribed values
    pub fn constrained_indices(&self, dim: Dimension, n_bases: usize) -> Result<BTreeMap<usize, f64>> {
        let mut out = BTreeMap::new();
        for (dof_id, value) in self.get_constrained_dofs() {
            if dof_id.node >= n_bases {
                return Err(FemError::InvalidConfig(format!(
                    "boundary condition on node {} but only {} nodes exist",
                    dof_id.node, n_bases
                )));
            }
            out.insert(dof_id.global_index(dim)?, value);
        }
        Ok(out)
    }

    /// Nodal loads (DOF -> total load)
    pub fn get_nodal_loads(&self) -> HashMap<DofId, f64> {
        let mut loads = HashMap::new();
        for load in &self.concentrated_loads {
            *loads.entry(load.dof_id()).or_insert(0.0) += load.magnitude;
        }
        loads
    }

    /// Concentrated loads as a global force vector
    pub fn load_vector(&self, dim: Dimension, n_bases: usize) -> Result<DVector<f64>> {
        let mut f = DVector::zeros(n_bases * dim.value());
        for (dof_id, magnitude) in self.get_nodal_loads() {
            if dof_id.node >= n_bases {
                return Err(FemError::InvalidConfig(format!(
                    "load on node {} but only {} nodes exist",
                    dof_id.node, n_bases
                )));
            }
            f[dof_id.global_index(dim)?] += magnitude;
        }
        Ok(f)
    }

    pub fn statistics(&self) -> BCStatistics {
        BCStatistics {
            num_displacement_bcs: self.displacement_bcs.len(),
            num_constrained_dofs: self.get_constrained_dofs().len(),
            num_concentrated_loads: self.concentrated_loads.len(),
            has_gravity: self.gravity.is_some(),
        }
    }
}

/// Boundary condition statistics
#[derive(Debug, Clone)]
pub struct BCStatistics {
    /// Number of displacement BC entries
    pub num_displacement_bcs: usize,
    /// Distinct constrained DOFs
    pub num_constrained_dofs: usize,
    pub num_concentrated_loads: usize,
    pub has_gravity: bool,
}

impl BCStatistics {
    /// Format as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "BCs: {} displacement entries ({} DOFs), {} concentrated loads, gravity {}",
            self.num_displacement_bcs,
            self.num_constrained_dofs,
            self.num_concentrated_loads,
            if self.has_gravity { "on" } else { "off" }
        )
    }
}
