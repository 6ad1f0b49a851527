//! # PHENOSIM-RUST Crate
//!
//! This library contains the simulation engine for the `phenosim-rust` package.
//! Five effect components (genetic fixed, genetic background, noise fixed,
//! correlated noise and noise background) are generated independently,
//! rescaled to a user-defined variance budget and summed into a final
//! phenotype matrix. The binary `simulate-phenotypes` calls functions from
//! this library.

pub mod budget;
pub mod compose;
pub mod distributions;
pub mod effects;
pub mod genotypes;
pub mod io;
pub mod kinship;
pub mod pipeline;
pub mod rescale;

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use budget::VarianceBudget;
pub use compose::{compose_phenotype, Phenotype, VarianceReport};
pub use effects::{EffectComponent, EffectMatrices};
pub use pipeline::{run_simulation, SimulationConfig, SimulationOutput};
pub use rescale::rescale_components;

/// Errors raised by the simulation core. All of them are fatal for the run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("Shape mismatch in {component}: expected {expected:?}, found {actual:?}")]
    ShapeMismatch {
        component: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("Invalid variance budget: {0}")]
    InvalidBudget(String),
    #[error("Degenerate component {component}: fraction {fraction} requested but the component has no variance")]
    DegenerateComponent { component: String, fraction: f64 },
    #[error("Parameter {parameter} = {value} out of range: {reason}")]
    ParameterRange {
        parameter: String,
        value: f64,
        reason: String,
    },
    #[error("Linear algebra error: {0}")]
    LinAlg(String),
}

impl SimulationError {
    pub(crate) fn range(parameter: &str, value: f64, reason: &str) -> Self {
        SimulationError::ParameterRange {
            parameter: parameter.to_string(),
            value,
            reason: reason.to_string(),
        }
    }
}

/// Dimensions shared by every matrix of one simulation run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSpace {
    /// Number of samples (rows)
    pub n_samples: usize,
    /// Number of traits (columns)
    pub n_traits: usize,
}

impl SampleSpace {
    pub fn new(n_samples: usize, n_traits: usize) -> Result<Self, SimulationError> {
        if n_samples == 0 {
            return Err(SimulationError::range("n_samples", 0.0, "must be at least 1"));
        }
        if n_traits == 0 {
            return Err(SimulationError::range("n_traits", 0.0, "must be at least 1"));
        }
        Ok(SampleSpace { n_samples, n_traits })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_samples, self.n_traits)
    }

    /// Returns `ShapeMismatch` unless `matrix` is exactly N x P.
    pub fn check(&self, component: &str, matrix: &Array2<f64>) -> Result<(), SimulationError> {
        if matrix.dim() != self.shape() {
            return Err(SimulationError::ShapeMismatch {
                component: component.to_string(),
                expected: self.shape(),
                actual: matrix.dim(),
            });
        }
        Ok(())
    }

    pub fn zeros(&self) -> Array2<f64> {
        Array2::zeros(self.shape())
    }
}

/// The five effect categories a phenotype is composed of.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    GeneticFixed,
    GeneticBg,
    NoiseFixed,
    NoiseCorrelated,
    NoiseBg,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 5] = [
        ComponentKind::GeneticFixed,
        ComponentKind::GeneticBg,
        ComponentKind::NoiseFixed,
        ComponentKind::NoiseCorrelated,
        ComponentKind::NoiseBg,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ComponentKind::GeneticFixed => "geneticFixed",
            ComponentKind::GeneticBg => "geneticBg",
            ComponentKind::NoiseFixed => "noiseFixed",
            ComponentKind::NoiseCorrelated => "noiseCorrelated",
            ComponentKind::NoiseBg => "noiseBg",
        }
    }

    pub fn is_genetic(&self) -> bool {
        matches!(self, ComponentKind::GeneticFixed | ComponentKind::GeneticBg)
    }

    /// Sub-matrix slots this component is made of.
    pub fn parts(&self) -> &'static [Part] {
        match self {
            ComponentKind::NoiseCorrelated => &[Part::Combined],
            _ => &[Part::Shared, Part::Independent],
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which sub-matrix of a component a value refers to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Part {
    Shared,
    Independent,
    Combined,
}

impl Part {
    pub fn name(&self) -> &'static str {
        match self {
            Part::Shared => "shared",
            Part::Independent => "independent",
            Part::Combined => "combined",
        }
    }
}

/// A single rescalable matrix: one part of one component.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
    pub kind: ComponentKind,
    pub part: Part,
}

impl Slot {
    pub fn new(kind: ComponentKind, part: Part) -> Self {
        Slot { kind, part }
    }

    /// All nine slots, in a stable order.
    pub fn all() -> Vec<Slot> {
        ComponentKind::ALL
            .iter()
            .flat_map(|kind| kind.parts().iter().map(move |part| Slot::new(*kind, *part)))
            .collect()
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.part {
            Part::Combined => write!(f, "{}", self.kind.name()),
            _ => write!(f, "{}.{}", self.kind.name(), self.part.name()),
        }
    }
}

/// Mean over columns of the population variance of each column.
///
/// This is the variance estimator used both for rescaling and for the
/// variance report, so budgeted and realised proportions are comparable.
pub fn mean_column_variance(matrix: &Array2<f64>) -> f64 {
    if matrix.is_empty() {
        return 0.0;
    }
    matrix.var_axis(Axis(0), 0.0).mean().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn slot_names_follow_component_parts() {
        let names: Vec<String> = Slot::all().iter().map(|s| s.to_string()).collect();
        assert_eq!(names.len(), 9);
        assert!(names.contains(&"geneticBg.shared".to_string()));
        assert!(names.contains(&"noiseCorrelated".to_string()));
    }

    #[test]
    fn mean_column_variance_uses_population_variance() {
        let m = array![[1.0, 0.0], [3.0, 0.0]];
        // column 0 has variance 1, column 1 has variance 0
        assert!((mean_column_variance(&m) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn sample_space_rejects_empty_dimensions() {
        assert!(SampleSpace::new(0, 3).is_err());
        assert!(SampleSpace::new(3, 0).is_err());
        let space = SampleSpace::new(2, 3).unwrap();
        let err = space.check("x", &Array2::zeros((3, 2))).unwrap_err();
        assert!(matches!(err, SimulationError::ShapeMismatch { .. }));
    }
}
