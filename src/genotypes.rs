//! Module for simulating, standardising and sub-setting genotype matrices.
//!
//! Genotypes are stored samples x variants (N x M) as minor-allele dosages.
use crate::SimulationError;
use ndarray::{Array2, Axis};
use rand::seq::{index, SliceRandom};
use rand::Rng;
use rand_distr::{Binomial, Distribution};
use rayon::prelude::*;

/// Allele frequencies used when none are given.
pub const DEFAULT_ALLELE_FREQUENCIES: [f64; 3] = [0.1, 0.2, 0.4];

/// Simulates an N x M dosage matrix. Each variant draws its allele frequency
/// uniformly from `frequencies`, each sample draws its dosage from
/// Binomial(2, f).
pub fn simulate_genotypes<R: Rng + ?Sized>(
    n_samples: usize,
    n_snps: usize,
    frequencies: &[f64],
    rng: &mut R,
) -> Result<Array2<f64>, SimulationError> {
    if frequencies.is_empty() {
        return Err(SimulationError::range(
            "frequencies",
            0.0,
            "at least one allele frequency is required",
        ));
    }
    if let Some(&bad) = frequencies.iter().find(|f| !(**f > 0.0 && **f < 1.0)) {
        return Err(SimulationError::range("frequencies", bad, "allele frequencies must lie in (0, 1)"));
    }

    log::debug!("Simulating {} genotypes for {} samples", n_snps, n_samples);
    let mut genotypes = Array2::zeros((n_samples, n_snps));
    for mut column in genotypes.axis_iter_mut(Axis(1)) {
        let freq = *frequencies.choose(rng).unwrap_or(&frequencies[0]);
        let binomial = Binomial::new(2, freq)
            .map_err(|e| SimulationError::range("frequencies", freq, &e.to_string()))?;
        for g in column.iter_mut() {
            *g = binomial.sample(rng) as f64;
        }
    }
    Ok(genotypes)
}

/// Centres each variant and scales it to unit population variance.
/// Monomorphic variants are only centred. Columns are processed in
/// parallel on the global rayon pool.
pub fn standardise_genotypes(genotypes: &Array2<f64>) -> Array2<f64> {
    let n = genotypes.nrows();
    let mut standardised = genotypes.clone();
    if n == 0 {
        return standardised;
    }
    standardised
        .axis_iter_mut(Axis(1))
        .into_par_iter()
        .for_each(|mut column| {
            let mean = column.sum() / n as f64;
            let var = column.iter().map(|g| (g - mean) * (g - mean)).sum::<f64>() / n as f64;
            let sd = if var > 1e-12 { var.sqrt() } else { 1.0 };
            column.mapv_inplace(|g| (g - mean) / sd);
        });
    standardised
}

/// Picks `n_causal` distinct variants at random.
/// Returns the N x k causal submatrix and the selected column indices (sorted).
pub fn select_causal_variants<R: Rng + ?Sized>(
    genotypes: &Array2<f64>,
    n_causal: usize,
    rng: &mut R,
) -> Result<(Array2<f64>, Vec<usize>), SimulationError> {
    let n_snps = genotypes.ncols();
    if n_causal > n_snps {
        return Err(SimulationError::range(
            "n_causal",
            n_causal as f64,
            &format!("cannot select more causal variants than the {} available", n_snps),
        ));
    }
    let mut selected = index::sample(rng, n_snps, n_causal).into_vec();
    selected.sort_unstable();
    log::debug!("Selected {} causal variants out of {}", n_causal, n_snps);
    Ok((genotypes.select(Axis(1), &selected), selected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn simulated_genotypes_are_dosages() {
        let mut rng = StdRng::seed_from_u64(42);
        let g = simulate_genotypes(30, 20, &DEFAULT_ALLELE_FREQUENCIES, &mut rng).unwrap();
        assert_eq!(g.dim(), (30, 20));
        assert!(g.iter().all(|&x| x == 0.0 || x == 1.0 || x == 2.0));
    }

    #[test]
    fn rejects_invalid_frequencies() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(simulate_genotypes(5, 5, &[0.0], &mut rng).is_err());
        assert!(simulate_genotypes(5, 5, &[], &mut rng).is_err());
    }

    #[test]
    fn standardised_columns_have_zero_mean_unit_variance() {
        let mut rng = StdRng::seed_from_u64(5);
        let g = simulate_genotypes(200, 10, &[0.3], &mut rng).unwrap();
        let s = standardise_genotypes(&g);
        for col in s.columns() {
            let mean = col.sum() / 200.0;
            let var = col.iter().map(|v| v * v).sum::<f64>() / 200.0;
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-10);
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn monomorphic_variants_are_centred_only() {
        let g = Array2::from_elem((4, 1), 2.0);
        let s = standardise_genotypes(&g);
        assert!(s.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn causal_selection_handles_zero_and_too_many() {
        let mut rng = StdRng::seed_from_u64(9);
        let g = simulate_genotypes(10, 6, &[0.2], &mut rng).unwrap();
        let (none, idx) = select_causal_variants(&g, 0, &mut rng).unwrap();
        assert_eq!(none.dim(), (10, 0));
        assert!(idx.is_empty());
        let (some, idx) = select_causal_variants(&g, 3, &mut rng).unwrap();
        assert_eq!(some.dim(), (10, 3));
        assert_eq!(some.column(0), g.column(idx[0]));
        assert!(select_causal_variants(&g, 7, &mut rng).is_err());
    }
}
