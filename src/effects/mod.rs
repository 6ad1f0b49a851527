//! Effect generators.
//!
//! Every generator returns raw, unscaled matrices of shape N x P. Only the
//! internal structure matters here; [`crate::rescale`] sets the final scale.
pub mod genetic;
pub mod noise;

pub use genetic::{genetic_bg_effects, genetic_fixed_effects};
pub use noise::{correlated_noise_effects, noise_bg_effects, noise_fixed_effects, trait_correlation_matrix};

use crate::distributions::Sampler;
use crate::{ComponentKind, Part, SampleSpace, SimulationError};
use ndarray::{Array1, Array2, Axis};
use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Raw matrices of one effect component.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum EffectMatrices {
    /// Effect identical in structure across traits plus trait-specific effect
    Split {
        shared: Array2<f64>,
        independent: Array2<f64>,
    },
    /// Single matrix (correlated noise)
    Combined(Array2<f64>),
}

impl EffectMatrices {
    pub fn get(&self, part: Part) -> Option<&Array2<f64>> {
        match (self, part) {
            (EffectMatrices::Split { shared, .. }, Part::Shared) => Some(shared),
            (EffectMatrices::Split { independent, .. }, Part::Independent) => Some(independent),
            (EffectMatrices::Combined(m), Part::Combined) => Some(m),
            _ => None,
        }
    }
}

/// A generated effect component.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EffectComponent {
    pub kind: ComponentKind,
    pub matrices: EffectMatrices,
}

impl EffectComponent {
    pub fn split(kind: ComponentKind, shared: Array2<f64>, independent: Array2<f64>) -> Self {
        EffectComponent {
            kind,
            matrices: EffectMatrices::Split { shared, independent },
        }
    }

    pub fn combined(kind: ComponentKind, matrix: Array2<f64>) -> Self {
        EffectComponent {
            kind,
            matrices: EffectMatrices::Combined(matrix),
        }
    }

    pub fn part(&self, part: Part) -> Option<&Array2<f64>> {
        self.matrices.get(part)
    }

    /// Verifies that the layout matches the kind and every matrix is N x P.
    pub fn check(&self, space: &SampleSpace) -> Result<(), SimulationError> {
        for part in self.kind.parts() {
            let name = format!("{}.{}", self.kind, part.name());
            match self.part(*part) {
                Some(m) => space.check(&name, m)?,
                None => {
                    return Err(SimulationError::ShapeMismatch {
                        component: format!("{} (missing {} matrix)", self.kind, part.name()),
                        expected: space.shape(),
                        actual: (0, 0),
                    })
                }
            }
        }
        Ok(())
    }
}

/// How effects of a predictor matrix divide into shared and independent ones.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct EffectSplit {
    /// Fraction of predictors with trait-specific effects
    pub p_independent: f64,
    /// Fraction of traits each independent predictor affects
    pub p_trait_independent: f64,
}

impl EffectSplit {
    pub fn validate(&self, context: &str) -> Result<(), SimulationError> {
        check_fraction(&format!("{}.p_independent", context), self.p_independent)?;
        check_fraction(&format!("{}.p_trait_independent", context), self.p_trait_independent)
    }

    /// Number of independent predictors among `n_predictors`.
    pub fn n_independent(&self, n_predictors: usize) -> usize {
        ((self.p_independent * n_predictors as f64).round() as usize).min(n_predictors)
    }

    /// Number of traits each independent predictor affects.
    pub fn n_affected_traits(&self, n_traits: usize) -> usize {
        if self.p_trait_independent <= 0.0 || n_traits == 0 {
            return 0;
        }
        ((self.p_trait_independent * n_traits as f64).round() as usize).clamp(1, n_traits)
    }
}

pub(crate) fn check_fraction(parameter: &str, value: f64) -> Result<(), SimulationError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(SimulationError::range(parameter, value, "must lie in [0, 1]"));
    }
    Ok(())
}

/// Effect-size matrix for `n_predictors` x `n_traits` where each row is
/// non-zero on exactly `n_affected` randomly chosen traits.
pub fn masked_effect_sizes<R: Rng + ?Sized>(
    n_predictors: usize,
    n_traits: usize,
    n_affected: usize,
    sampler: &Sampler,
    rng: &mut R,
) -> Array2<f64> {
    let mut betas = sampler.matrix(n_predictors, n_traits, rng);
    for mut row in betas.axis_iter_mut(Axis(0)) {
        let mut keep = Array1::from_elem(n_traits, false);
        for t in index::sample(rng, n_traits, n_affected.min(n_traits)).into_iter() {
            keep[t] = true;
        }
        for (beta, &kept) in row.iter_mut().zip(keep.iter()) {
            if !kept {
                *beta = 0.0;
            }
        }
    }
    betas
}

/// Splits the predictors (N x k) into shared and independent ones and
/// returns `(shared, independent)` effect matrices, both N x P.
///
/// Shared predictors get one effect size each, broadcast identically to all
/// traits. Independent predictors get one effect size per trait, restricted
/// to a random subset of traits.
pub fn shared_independent_effects<R: Rng + ?Sized>(
    predictors: &Array2<f64>,
    n_traits: usize,
    split: &EffectSplit,
    sampler: &Sampler,
    rng: &mut R,
) -> Result<(Array2<f64>, Array2<f64>), SimulationError> {
    split.validate("split")?;
    let (n_samples, n_predictors) = predictors.dim();
    let n_independent = split.n_independent(n_predictors);

    let mut independent_idx = index::sample(rng, n_predictors, n_independent).into_vec();
    independent_idx.sort_unstable();
    let shared_idx: Vec<usize> = (0..n_predictors)
        .filter(|i| independent_idx.binary_search(i).is_err())
        .collect();

    log::debug!(
        "Effect split: {} shared and {} independent predictors over {} traits",
        shared_idx.len(),
        independent_idx.len(),
        n_traits
    );

    let mut shared = Array2::zeros((n_samples, n_traits));
    if !shared_idx.is_empty() {
        let betas = sampler.vector(shared_idx.len(), rng);
        let signal = predictors.select(Axis(1), &shared_idx).dot(&betas);
        for mut col in shared.axis_iter_mut(Axis(1)) {
            col.assign(&signal);
        }
    }

    let mut independent = Array2::zeros((n_samples, n_traits));
    if !independent_idx.is_empty() {
        let n_affected = split.n_affected_traits(n_traits);
        let betas = masked_effect_sizes(independent_idx.len(), n_traits, n_affected, sampler, rng);
        independent = predictors.select(Axis(1), &independent_idx).dot(&betas);
    }

    Ok((shared, independent))
}
