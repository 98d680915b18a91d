//! Material properties for hyperelastic and linear elastic solids.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{FemError, Result};

/// Material model type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MaterialModel {
    /// Small-strain isotropic linear elasticity
    LinearElastic,
    /// Compressible neo-Hookean hyperelasticity
    #[default]
    NeoHookean,
}

impl MaterialModel {
    /// True if the stiffness does not depend on the configuration
    pub fn is_linear(self) -> bool {
        matches!(self, MaterialModel::LinearElastic)
    }
}

/// Lamé parameters (λ, μ) of an isotropic material
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LameParameters {
    /// First Lamé parameter λ
    pub lambda: f64,
    /// Shear modulus μ
    pub mu: f64,
}

impl LameParameters {
    /// Convert Young's modulus and Poisson's ratio.
    ///
    /// # Arguments
    /// * `e` - Young's modulus, must be positive
    /// * `nu` - Poisson's ratio, in (-1, 0.5)
    pub fn from_young_poisson(e: f64, nu: f64) -> Result<Self> {
        if !(e > 0.0) {
            return Err(FemError::InvalidMaterial(format!(
                "Young's modulus must be positive, got {e}"
            )));
        }
        if !(nu > -1.0 && nu < 0.5) {
            return Err(FemError::InvalidMaterial(format!(
                "Poisson's ratio must lie in (-1, 0.5), got {nu}"
            )));
        }
        Ok(Self {
            lambda: e * nu / ((1.0 + nu) * (1.0 - 2.0 * nu)),
            mu: e / (2.0 * (1.0 + nu)),
        })
    }
}

/// A material definition
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    /// Material name
    pub name: String,
    /// Material model type
    pub model: MaterialModel,
    /// Young's modulus (E) [Pa]
    pub elastic_modulus: Option<f64>,
    /// Poisson's ratio (ν) [-]
    pub poissons_ratio: Option<f64>,
    /// Density (ρ) [kg/m³]
    pub density: Option<f64>,
}

impl Material {
    /// Create a new material with a given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder-style elastic constants
    pub fn with_elastic(mut self, e: f64, nu: f64) -> Self {
        self.elastic_modulus = Some(e);
        self.poissons_ratio = Some(nu);
        self
    }

    pub fn with_model(mut self, model: MaterialModel) -> Self {
        self.model = model;
        self
    }

    pub fn with_density(mut self, rho: f64) -> Self {
        self.density = Some(rho);
        self
    }

    /// Lamé parameters, failing if E or ν is missing or out of range
    pub fn lame(&self) -> Result<LameParameters> {
        match (self.elastic_modulus, self.poissons_ratio) {
            (Some(e), Some(nu)) => LameParameters::from_young_poisson(e, nu),
            _ => Err(FemError::InvalidMaterial(format!(
                "material '{}' is missing elastic constants",
                self.name
            ))),
        }
    }
}

/// Material library containing all materials and their assignments
#[derive(Debug, Clone, Default)]
pub struct MaterialLibrary {
    /// All materials by name
    materials: HashMap<String, Material>,
    /// Element-to-material assignments (element index -> material name)
    element_materials: HashMap<usize, String>,
    /// Material used by elements without an explicit assignment
    default_material: Option<String>,
}

impl MaterialLibrary {
    /// Create an empty material library
    pub fn new() -> Self {
        Self::default()
    }

    /// Library with a single material applied to every element
    pub fn uniform(material: Material) -> Self {
        let mut library = Self::new();
        library.default_material = Some(material.name.clone());
        library.add_material(material);
        library
    }

    /// Add a material to the library
    pub fn add_material(&mut self, material: Material) {
        self.materials.insert(material.name.clone(), material);
    }

    /// Get a material by name
    pub fn get_material(&self, name: &str) -> Option<&Material> {
        self.materials.get(name)
    }

    /// Set the material used for unassigned elements
    pub fn set_default(&mut self, material_name: impl Into<String>) {
        self.default_material = Some(material_name.into());
    }

    /// Assign a material to an element
    pub fn assign_material(&mut self, element: usize, material_name: impl Into<String>) {
        self.element_materials.insert(element, material_name.into());
    }

    /// Get the material for an element, falling back to the default
    pub fn get_element_material(&self, element: usize) -> Option<&Material> {
        self.element_materials
            .get(&element)
            .or(self.default_material.as_ref())
            .and_then(|name| self.materials.get(name))
    }

    fn require_element_material(&self, element: usize) -> Result<&Material> {
        self.get_element_material(element).ok_or_else(|| {
            FemError::InvalidMaterial(format!("no material assigned to element {element}"))
        })
    }

    /// Lamé parameters for elements `0..n_elements`.
    pub fn element_parameters(&self, n_elements: usize) -> Result<Vec<LameParameters>> {
        (0..n_elements)
            .map(|e| self.require_element_material(e)?.lame())
            .collect()
    }

    /// Densities for elements `0..n_elements` (0 where unset).
    pub fn element_densities(&self, n_elements: usize) -> Result<Vec<f64>> {
        (0..n_elements)
            .map(|e| Ok(self.require_element_material(e)?.density.unwrap_or(0.0)))
            .collect()
    }

    /// The constitutive model shared by all elements.
    ///
    /// One assembler handles one model, so mixed assignments are rejected.
    pub fn model(&self, n_elements: usize) -> Result<MaterialModel> {
        let mut model = None;
        for e in 0..n_elements {
            let m = self.require_element_material(e)?.model;
            match model {
                None => model = Some(m),
                Some(prev) if prev != m => {
                    return Err(FemError::InvalidMaterial(format!(
                        "element {e} uses {m:?} but earlier elements use {prev:?}"
                    )));
                }
                Some(_) => {}
            }
        }
        model.ok_or_else(|| FemError::InvalidMaterial("no elements to assign".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lame_parameters_match_moduli() {
        let mat = Material::new("RUBBER").with_elastic(1.0e6, 0.45);
        let lame = mat.lame().unwrap();
        assert!((lame.mu - 1.0e6 / 2.9).abs() < 1e-6);
        // K = λ + 2μ/3 = E / (3 (1 - 2ν)) in 3D
        let k = lame.lambda + 2.0 * lame.mu / 3.0;
        assert!((k - 1.0e6 / 0.3).abs() < 1e-3);
    }

    #[test]
    fn rejects_invalid_elastic_constants() {
        assert!(LameParameters::from_young_poisson(-1.0, 0.3).is_err());
        assert!(LameParameters::from_young_poisson(1.0, 0.5).is_err());
        assert!(LameParameters::from_young_poisson(1.0, f64::NAN).is_err());
        assert!(Material::new("EMPTY").lame().is_err());
    }

    #[test]
    fn element_material_assignment() {
        let mut library = MaterialLibrary::new();
        library.add_material(Material::new("STEEL").with_elastic(210000.0, 0.3));
        library.add_material(Material::new("SOFT").with_elastic(1000.0, 0.3));
        library.set_default("STEEL");
        library.assign_material(1, "SOFT");

        assert_eq!(library.get_element_material(0).unwrap().name, "STEEL");
        assert_eq!(library.get_element_material(1).unwrap().name, "SOFT");

        let params = library.element_parameters(3).unwrap();
        assert!(params[1].mu < params[0].mu);
        assert_eq!(params[0], params[2]);
    }

    #[test]
    fn missing_assignment_is_an_error() {
        let mut library = MaterialLibrary::new();
        library.add_material(Material::new("STEEL").with_elastic(210000.0, 0.3));
        library.assign_material(0, "STEEL");
        assert!(library.element_parameters(1).is_ok());
        assert!(library.element_parameters(2).is_err());
    }

    #[test]
    fn mixed_models_are_rejected() {
        let mut library = MaterialLibrary::new();
        library.add_material(
            Material::new("A")
                .with_elastic(1.0, 0.3)
                .with_model(MaterialModel::LinearElastic),
        );
        library.add_material(Material::new("B").with_elastic(1.0, 0.3));
        library.set_default("A");
        assert_eq!(library.model(2).unwrap(), MaterialModel::LinearElastic);
        library.assign_material(1, "B");
        assert!(library.model(2).is_err());
    }

    #[test]
    fn deserializes_from_json_with_defaults() {
        let mat: Material = serde_json::from_str(
            r#"{ "name": "RUBBER", "elastic_modulus": 1e6, "poissons_ratio": 0.4 }"#,
        )
        .unwrap();
        assert_eq!(mat.model, MaterialModel::NeoHookean);
        assert_eq!(mat.density, None);
    }
}
