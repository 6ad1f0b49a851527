//! Noise effects: confounders, trait-correlated noise and background noise.
use super::{check_fraction, shared_independent_effects, EffectComponent, EffectSplit};
use crate::distributions::{standard_normal_matrix, ConfounderDistribution, EffectSizeDistribution};
use crate::{ComponentKind, SimulationError};
use nalgebra::{Cholesky, DMatrix};
use ndarray::{Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One group of confounders sharing a distribution and an effect split.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConfounderGroup {
    /// Number of confounder variables in this group
    pub n_confounders: usize,
    pub distribution: ConfounderDistribution,
    pub split: EffectSplit,
}

/// Fixed noise effects summed over all confounder groups.
pub fn noise_fixed_effects<R: Rng + ?Sized>(
    n_samples: usize,
    n_traits: usize,
    groups: &[ConfounderGroup],
    effect_sizes: &EffectSizeDistribution,
    rng: &mut R,
) -> Result<EffectComponent, SimulationError> {
    // Resolve every distribution before drawing anything
    let beta_sampler = effect_sizes.sampler()?;
    let samplers = groups
        .iter()
        .enumerate()
        .map(|(i, group)| {
            group.split.validate(&format!("confounder_group[{}]", i))?;
            group.distribution.sampler()
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut shared = Array2::zeros((n_samples, n_traits));
    let mut independent = Array2::zeros((n_samples, n_traits));
    for (i, (group, sampler)) in groups.iter().zip(samplers.iter()).enumerate() {
        let confounders = sampler.confounders(n_samples, group.n_confounders, rng);
        log::debug!(
            "Confounder group {}: {} variables ({} columns) from {:?}",
            i,
            group.n_confounders,
            confounders.ncols(),
            group.distribution
        );
        let (s, ind) =
            shared_independent_effects(&confounders, n_traits, &group.split, &beta_sampler, rng)?;
        shared += &s;
        independent += &ind;
    }

    Ok(EffectComponent::split(ComponentKind::NoiseFixed, shared, independent))
}

/// P x P correlation matrix with C[i, j] = pcorr^|i - j|.
pub fn trait_correlation_matrix(n_traits: usize, pcorr: f64) -> Result<Array2<f64>, SimulationError> {
    check_fraction("pcorr", pcorr)?;
    Ok(Array2::from_shape_fn((n_traits, n_traits), |(i, j)| {
        pcorr.powi((i as i32 - j as i32).abs())
    }))
}

/// Noise whose sample rows are independent draws from N_P(0, C), with C
/// from [`trait_correlation_matrix`].
///
/// pcorr = 1 gives identical columns; a single trait gives one standard
/// normal column.
pub fn correlated_noise_effects<R: Rng + ?Sized>(
    n_samples: usize,
    n_traits: usize,
    pcorr: f64,
    rng: &mut R,
) -> Result<EffectComponent, SimulationError> {
    let correlation = trait_correlation_matrix(n_traits, pcorr)?;

    if n_traits <= 1 || pcorr >= 1.0 {
        let z = standard_normal_matrix(n_samples, 1, rng);
        let mut noise = Array2::zeros((n_samples, n_traits));
        for mut col in noise.axis_iter_mut(Axis(1)) {
            col.assign(&z.column(0));
        }
        return Ok(EffectComponent::combined(ComponentKind::NoiseCorrelated, noise));
    }

    let c = DMatrix::from_fn(n_traits, n_traits, |i, j| correlation[[i, j]]);
    let l = Cholesky::new(c)
        .ok_or_else(|| {
            SimulationError::LinAlg(format!(
                "trait correlation matrix with pcorr = {} is not positive definite",
                pcorr
            ))
        })?
        .l();
    let l = Array2::from_shape_fn((n_traits, n_traits), |(i, j)| l[(i, j)]);

    let z = standard_normal_matrix(n_samples, n_traits, rng);
    let noise = z.dot(&l.t());
    Ok(EffectComponent::combined(ComponentKind::NoiseCorrelated, noise))
}

/// Background noise: independent entries i.i.d. N(mean, sd) and a shared
/// rank-one effect a b^T with a ~ N(mean, sd)^N, b ~ N(mean, sd)^P.
pub fn noise_bg_effects<R: Rng + ?Sized>(
    n_samples: usize,
    n_traits: usize,
    mean: f64,
    sd: f64,
    rng: &mut R,
) -> Result<EffectComponent, SimulationError> {
    let sampler = EffectSizeDistribution::Normal { mean, sd }.sampler()?;

    let a = sampler.vector(n_samples, rng);
    let b = sampler.vector(n_traits, rng);
    let shared = a.insert_axis(Axis(1)).dot(&b.insert_axis(Axis(0)));

    let independent = sampler.matrix(n_samples, n_traits, rng);

    Ok(EffectComponent::split(ComponentKind::NoiseBg, shared, independent))
}
