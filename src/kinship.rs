//! Module for building, normalising and caching kinship matrices
use crate::genotypes::standardise_genotypes;
use crate::SimulationError;
use nalgebra::{Cholesky, DMatrix, SymmetricEigen};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Diagonal regulariser added after mean-diagonal normalisation.
pub const KINSHIP_DIAGONAL_JITTER: f64 = 1e-4;

/// Tolerance for the symmetry check.
const SYMMETRY_TOLERANCE: f64 = 1e-8;

/// A kinship matrix with the sample IDs labelling its rows and columns.
/// This is the on-disk cache format (bincode).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct KinshipData {
    pub kinship: Array2<f64>,
    pub sample_ids: Vec<String>,
}

impl KinshipData {
    /// Pairs a kinship with its sample IDs after checking that the matrix
    /// is a valid kinship with one ID per row.
    pub fn new(kinship: Array2<f64>, sample_ids: Vec<String>) -> Result<Self, SimulationError> {
        check_kinship(&kinship)?;
        if sample_ids.len() != kinship.nrows() {
            return Err(SimulationError::ShapeMismatch {
                component: "kinship sample IDs".into(),
                expected: (kinship.nrows(), 1),
                actual: (sample_ids.len(), 1),
            });
        }
        Ok(KinshipData { kinship, sample_ids })
    }
}

/// Reads a kinship cache written by [`save_kinship_to_file`] and validates it.
pub fn load_kinship_from_file(kinship_file: &Path) -> Result<KinshipData, Box<dyn std::error::Error>> {
    let reader = BufReader::new(File::open(kinship_file)?);
    let cached: KinshipData = bincode::deserialize_from(reader)?;
    let data = KinshipData::new(cached.kinship, cached.sample_ids)?;
    log::info!(
        "Loaded cached kinship for {} samples from {:?}",
        data.sample_ids.len(),
        kinship_file
    );
    Ok(data)
}

/// Writes a kinship and its sample IDs as a bincode cache. The pair is
/// validated first so a bad cache is never written.
pub fn save_kinship_to_file(
    kinship_file: &Path,
    kinship: &Array2<f64>,
    sample_ids: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let data = KinshipData::new(kinship.clone(), sample_ids.to_vec())?;
    let mut writer = BufWriter::new(File::create(kinship_file)?);
    bincode::serialize_into(&mut writer, &data)?;
    writer.flush()?;
    log::info!("Cached kinship for {} samples in {:?}", data.sample_ids.len(), kinship_file);
    Ok(())
}

/// Calculates the kinship (K = XX^T / M) from an N x M genotype matrix.
///
/// Each variant is centred and scaled to unit variance first.
pub fn kinship_from_genotypes(genotypes: &Array2<f64>) -> Result<Array2<f64>, SimulationError> {
    let (n_samples, n_variants) = genotypes.dim();
    if n_variants == 0 {
        return Err(SimulationError::range(
            "n_snps",
            0.0,
            "kinship needs at least one genotyped variant",
        ));
    }
    if genotypes.iter().any(|g| !g.is_finite()) {
        return Err(SimulationError::LinAlg("genotype matrix contains non-finite values".into()));
    }

    log::info!("Computing kinship ({} x {}) from {} variants...", n_samples, n_samples, n_variants);

    let standardised = standardise_genotypes(genotypes);
    let kinship = standardised.dot(&standardised.t()) / n_variants as f64;
    log::debug!("Kinship computed with shape {:?}", kinship.dim());
    Ok(kinship)
}

/// Checks that a kinship matrix is square, finite and symmetric.
pub fn check_kinship(kinship: &Array2<f64>) -> Result<(), SimulationError> {
    let (rows, cols) = kinship.dim();
    if rows != cols {
        return Err(SimulationError::ShapeMismatch {
            component: "kinship".into(),
            expected: (rows, rows),
            actual: (rows, cols),
        });
    }
    if kinship.iter().any(|v| !v.is_finite()) {
        return Err(SimulationError::LinAlg("kinship contains non-finite values".into()));
    }
    for i in 0..rows {
        for j in (i + 1)..rows {
            if (kinship[[i, j]] - kinship[[j, i]]).abs() > SYMMETRY_TOLERANCE {
                return Err(SimulationError::LinAlg(format!(
                    "kinship is not symmetric at ({}, {}): {} vs {}",
                    i, j, kinship[[i, j]], kinship[[j, i]]
                )));
            }
        }
    }
    Ok(())
}

/// Divides the kinship by its mean diagonal and adds a small jitter to the
/// diagonal so the Cholesky factor exists.
pub fn normalise_kinship(kinship: &Array2<f64>) -> Result<Array2<f64>, SimulationError> {
    check_kinship(kinship)?;
    let mean_diag = kinship.diag().mean().unwrap_or(0.0);
    if mean_diag <= 0.0 {
        return Err(SimulationError::range(
            "kinship diagonal mean",
            mean_diag,
            "must be strictly positive to normalise",
        ));
    }
    let mut normalised = kinship / mean_diag;
    normalised
        .diag_mut()
        .mapv_inplace(|k_ii| k_ii + KINSHIP_DIAGONAL_JITTER);
    Ok(normalised)
}

/// Returns L with L L^T = K.
///
/// Uses the lower Cholesky factor when K is positive definite. Semi-definite
/// matrices fall back to U diag(sqrt(max(lambda, 0))) from the symmetric
/// eigendecomposition.
pub fn kinship_factor(kinship: &Array2<f64>) -> Result<Array2<f64>, SimulationError> {
    check_kinship(kinship)?;
    let n = kinship.nrows();
    let k = DMatrix::from_fn(n, n, |i, j| kinship[[i, j]]);

    let cholesky = Cholesky::new(k.clone())
        .map(|chol| chol.l())
        .filter(|l| l.iter().all(|v| v.is_finite()));

    let factor = match cholesky {
        Some(l) => l,
        None => {
            log::warn!("Kinship is not positive definite; using eigendecomposition factor");
            let eigen = SymmetricEigen::new(k);
            let min_eigenvalue = eigen.eigenvalues.min();
            if min_eigenvalue < -1e-6 * eigen.eigenvalues.amax().max(1.0) {
                log::warn!(
                    "Kinship has negative eigenvalue {:.3e}; clamping to zero",
                    min_eigenvalue
                );
            }
            let roots = eigen.eigenvalues.map(|l| l.max(0.0).sqrt());
            let mut factor = eigen.eigenvectors;
            for (j, root) in roots.iter().enumerate() {
                factor.column_mut(j).scale_mut(*root);
            }
            factor
        }
    };

    Ok(Array2::from_shape_fn((n, n), |(i, j)| factor[(i, j)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genotypes::simulate_genotypes;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn kinship_from_genotypes_is_symmetric_with_unit_mean_diagonal() {
        let mut rng = StdRng::seed_from_u64(42);
        let g = simulate_genotypes(25, 200, &[0.4], &mut rng).unwrap();
        let k = kinship_from_genotypes(&g).unwrap();
        assert_eq!(k.dim(), (25, 25));
        check_kinship(&k).unwrap();
        // standardised genotypes give a diagonal averaging one
        assert_abs_diff_eq!(k.diag().mean().unwrap(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn normalisation_divides_by_mean_diagonal_and_adds_jitter() {
        let k = array![[2.0, 1.0], [1.0, 2.0]];
        let n = normalise_kinship(&k).unwrap();
        assert_abs_diff_eq!(n[[0, 0]], 1.0 + KINSHIP_DIAGONAL_JITTER, epsilon = 1e-12);
        assert_abs_diff_eq!(n[[0, 1]], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn rejects_non_square_and_asymmetric() {
        assert!(matches!(
            check_kinship(&Array2::zeros((2, 3))),
            Err(SimulationError::ShapeMismatch { .. })
        ));
        let k = array![[1.0, 0.2], [0.3, 1.0]];
        assert!(matches!(check_kinship(&k), Err(SimulationError::LinAlg(_))));
    }

    #[test]
    fn factor_reconstructs_positive_definite_kinship() {
        let k = array![[1.0, 0.5, 0.1], [0.5, 1.0, 0.3], [0.1, 0.3, 1.0]];
        let l = kinship_factor(&k).unwrap();
        let rebuilt = l.dot(&l.t());
        for (a, b) in rebuilt.iter().zip(k.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn factor_falls_back_for_semi_definite_kinship() {
        // rank one: every sample identical
        let k = Array2::from_elem((3, 3), 1.0);
        let l = kinship_factor(&k).unwrap();
        let rebuilt = l.dot(&l.t());
        for (a, b) in rebuilt.iter().zip(k.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-8);
        }
    }

    #[test]
    fn kinship_cache_round_trips_through_bincode() {
        let dir = std::env::temp_dir().join(format!("phenosim-kinship-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("kinship.bin");
        let k = array![[1.0, 0.25], [0.25, 1.0]];
        let ids = vec!["s1".to_string(), "s2".to_string()];
        save_kinship_to_file(&path, &k, &ids).unwrap();
        let loaded = load_kinship_from_file(&path).unwrap();
        assert_eq!(loaded.kinship, k);
        assert_eq!(loaded.sample_ids, ids);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn kinship_cache_rejects_mismatched_sample_ids() {
        let dir = std::env::temp_dir().join(format!("phenosim-kinship-ids-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("kinship.bin");
        let k = array![[1.0, 0.25], [0.25, 1.0]];
        assert!(save_kinship_to_file(&path, &k, &["s1".to_string()]).is_err());
        assert!(!path.exists());

        // a cache written by something else is validated on load
        let bad = KinshipData {
            kinship: array![[1.0, 0.2], [0.3, 1.0]],
            sample_ids: vec!["s1".to_string(), "s2".to_string()],
        };
        let file = File::create(&path).unwrap();
        bincode::serialize_into(file, &bad).unwrap();
        assert!(load_kinship_from_file(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn kinship_data_requires_one_id_per_sample() {
        let err = KinshipData::new(Array2::eye(3), vec!["a".to_string()]).unwrap_err();
        assert!(matches!(err, SimulationError::ShapeMismatch { .. }));
        assert!(KinshipData::new(Array2::eye(2), vec!["a".to_string(), "b".to_string()]).is_ok());
    }
}
