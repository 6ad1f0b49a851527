//! Genetic effects: fixed effects of causal variants and background effects
//! driven by the kinship.
use super::{shared_independent_effects, EffectComponent, EffectSplit};
use crate::distributions::{standard_normal_matrix, standard_normal_vector, EffectSizeDistribution};
use crate::kinship::kinship_factor;
use crate::{ComponentKind, SimulationError};
use ndarray::{Array2, Axis};
use rand::Rng;

/// Fixed effects of the N x k causal genotypes.
///
/// `split.p_independent` of the variants act on a random subset of traits,
/// the remaining variants act identically on all traits. k = 0 is allowed
/// and yields zero matrices.
pub fn genetic_fixed_effects<R: Rng + ?Sized>(
    causal_genotypes: &Array2<f64>,
    n_traits: usize,
    split: &EffectSplit,
    effect_sizes: &EffectSizeDistribution,
    rng: &mut R,
) -> Result<EffectComponent, SimulationError> {
    split.validate("genetic_fixed")?;
    let sampler = effect_sizes.sampler()?;
    if causal_genotypes.ncols() == 0 {
        log::warn!("No causal variants supplied; genetic fixed effects are zero");
    }
    let (shared, independent) =
        shared_independent_effects(causal_genotypes, n_traits, split, &sampler, rng)?;
    Ok(EffectComponent::split(ComponentKind::GeneticFixed, shared, independent))
}

/// Background genetic effects E = L B A where L L^T = K.
///
/// The independent effect uses a diagonal A (one weight per trait), the
/// shared effect uses an A whose first row only is non-zero, which makes it
/// rank one. Shared and independent effects use separate draws of B.
pub fn genetic_bg_effects<R: Rng + ?Sized>(
    kinship: &Array2<f64>,
    n_traits: usize,
    rng: &mut R,
) -> Result<EffectComponent, SimulationError> {
    let factor = kinship_factor(kinship)?;
    Ok(genetic_bg_effects_from_factor(&factor, n_traits, rng))
}

/// Same as [`genetic_bg_effects`] for an already factorised kinship.
pub fn genetic_bg_effects_from_factor<R: Rng + ?Sized>(
    factor: &Array2<f64>,
    n_traits: usize,
    rng: &mut R,
) -> EffectComponent {
    let n_samples = factor.nrows();

    // shared: (L b_1) a^T, b_1 the first column of B
    let b_shared = standard_normal_matrix(n_samples, n_traits, rng);
    let a_shared = standard_normal_vector(n_traits, rng);
    let latent = factor.dot(&b_shared.column(0));
    let shared = latent
        .insert_axis(Axis(1))
        .dot(&a_shared.insert_axis(Axis(0)));

    // independent: (L B) diag(a)
    let b_independent = standard_normal_matrix(n_samples, n_traits, rng);
    let a_independent = standard_normal_vector(n_traits, rng);
    let mut independent = factor.dot(&b_independent);
    for (mut col, a) in independent.axis_iter_mut(Axis(1)).zip(a_independent.iter()) {
        col.mapv_inplace(|v| v * a);
    }

    EffectComponent::split(ComponentKind::GeneticBg, shared, independent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::trait_correlation;
    use crate::genotypes::{select_causal_variants, simulate_genotypes, standardise_genotypes};
    use crate::kinship::{kinship_from_genotypes, normalise_kinship};
    use crate::Part;
    use nalgebra::DMatrix;
    use rand::rngs::StdRng;
    use rand::SeedableRng;


    fn test_kinship(n: usize, rng: &mut StdRng) -> Array2<f64> {
        let g = simulate_genotypes(n, 300, &[0.1, 0.2, 0.4], rng).unwrap();
        normalise_kinship(&kinship_from_genotypes(&g).unwrap()).unwrap()
    }

    #[test]
    fn fixed_effects_have_sample_by_trait_shape() {
        let mut rng = StdRng::seed_from_u64(10);
        let g = simulate_genotypes(40, 50, &[0.2], &mut rng).unwrap();
        let (causal, _) = select_causal_variants(&standardise_genotypes(&g), 10, &mut rng).unwrap();
        let split = EffectSplit { p_independent: 0.4, p_trait_independent: 0.5 };
        let effects = genetic_fixed_effects(&causal, 6, &split, &EffectSizeDistribution::default(), &mut rng).unwrap();
        assert_eq!(effects.part(Part::Shared).unwrap().dim(), (40, 6));
        assert_eq!(effects.part(Part::Independent).unwrap().dim(), (40, 6));
    }

    #[test]
    fn fixed_effects_reject_bad_split() {
        let mut rng = StdRng::seed_from_u64(10);
        let split = EffectSplit { p_independent: 1.2, p_trait_independent: 0.5 };
        let err = genetic_fixed_effects(&Array2::zeros((3, 2)), 2, &split, &EffectSizeDistribution::default(), &mut rng)
            .unwrap_err();
        assert!(matches!(err, SimulationError::ParameterRange { .. }));
    }

    #[test]
    fn background_shared_effect_is_rank_one() {
        let mut rng = StdRng::seed_from_u64(20);
        let k = test_kinship(60, &mut rng);
        let effects = genetic_bg_effects(&k, 8, &mut rng).unwrap();
        let shared = effects.part(Part::Shared).unwrap();
        let m = DMatrix::from_fn(60, 8, |i, j| shared[[i, j]]);
        let sv = m.singular_values();
        let largest = sv.max();
        assert!(largest > 0.0);
        // every singular value after the first is numerical noise
        let mut sorted: Vec<f64> = sv.iter().cloned().collect();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
        assert!(sorted[1] / largest < 1e-10);
    }

    #[test]
    fn background_independent_effect_is_uncorrelated_across_traits() {
        let mut rng = StdRng::seed_from_u64(30);
        let n = 400;
        // identity kinship isolates the trait structure
        let mut k = Array2::<f64>::eye(n);
        k.diag_mut().mapv_inplace(|v| v + 1e-4);
        let effects = genetic_bg_effects(&k, 5, &mut rng).unwrap();
        let r = trait_correlation(effects.part(Part::Independent).unwrap());
        for i in 0..5 {
            for j in (i + 1)..5 {
                assert!(r[[i, j]].abs() < 0.2);
            }
        }
    }

    #[test]
    fn background_effects_are_reproducible() {
        let mut rng = StdRng::seed_from_u64(40);
        let k = test_kinship(20, &mut rng);
        let a = genetic_bg_effects(&k, 3, &mut StdRng::seed_from_u64(99)).unwrap();
        let b = genetic_bg_effects(&k, 3, &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(a, b);
    }
}
