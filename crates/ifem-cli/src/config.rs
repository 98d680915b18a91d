use std::path::Path;

use ifem_solver::{
    BoundaryConditions, Dimension, FormConfig, Material, MaterialModel, Mesh, NewtonConfig,
};
use serde::{Deserialize, Serialize};

/// Structured mesh to generate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeshConfig {
    Rectangle { cells: [usize; 2], size: [f64; 2] },
    Box { cells: [usize; 3], size: [f64; 3] },
}

impl MeshConfig {
    pub fn build(&self) -> ifem_solver::Result<Mesh> {
        match self {
            MeshConfig::Rectangle { cells, size } => {
                Mesh::rectangle(cells[0], cells[1], size[0], size[1])
            }
            MeshConfig::Box { cells, size } => Mesh::box_mesh(*cells, *size),
        }
    }

    pub fn dim(&self) -> Dimension {
        match self {
            MeshConfig::Rectangle { .. } => Dimension::Two,
            MeshConfig::Box { .. } => Dimension::Three,
        }
    }
}

/// Everything `ifem-cli run` needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub mesh: MeshConfig,
    /// Lagrange order of the displacement basis
    pub order: usize,
    pub material: Material,
    /// Clamp every node on the `x = 0` face
    pub clamp_min_x: bool,
    pub boundary_conditions: BoundaryConditions,
    pub form: FormConfig,
    pub newton: NewtonConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mesh: MeshConfig::Rectangle {
                cells: [8, 2],
                size: [4.0, 1.0],
            },
            order: 1,
            material: Material::new("default")
                .with_model(MaterialModel::NeoHookean)
                .with_elastic(1.0e4, 0.3)
                .with_density(1.0),
            clamp_min_x: true,
            boundary_conditions: BoundaryConditions::default(),
            form: FormConfig::default(),
            newton: NewtonConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
        serde_json::from_str(&text).map_err(|err| format!("{}: {err}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let config: RunConfig = serde_json::from_str(
            r#"{
                "mesh": {"kind": "box", "cells": [2, 1, 1], "size": [2.0, 1.0, 1.0]},
                "order": 2,
                "newton": {"load_steps": 3}
            }"#,
        )
        .unwrap();
        assert_eq!(config.mesh.dim(), Dimension::Three);
        assert_eq!(config.order, 2);
        assert_eq!(config.newton.load_steps, 3);
        assert_eq!(config.newton.max_iterations, NewtonConfig::default().max_iterations);
        assert!(config.clamp_min_x);
        assert_eq!(config.form, FormConfig::default());
    }

    #[test]
    fn demo_configs_parse() {
        for text in [
            include_str!("../demos/cantilever.json"),
            include_str!("../demos/box.json"),
        ] {
            let config: RunConfig = serde_json::from_str(text).unwrap();
            assert!(config.material.lame().is_ok());
            assert!(config.mesh.build().is_ok());
        }
    }

    #[test]
    fn builds_configured_mesh() {
        let config = RunConfig::default();
        let mesh = config.mesh.build().unwrap();
        assert_eq!(mesh.num_elements(), 8 * 2 * 2);
    }
}
