//! Distributions used for effect sizes and confounders.
//!
//! Distribution choices are plain enums carrying their parameters. They are
//! validated once and turned into a [`Sampler`], so generators never re-check
//! parameters per draw.
use crate::SimulationError;
use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::{Bernoulli, Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

/// Distribution of effect sizes (SNP and confounder weights).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum EffectSizeDistribution {
    Normal { mean: f64, sd: f64 },
    /// Uniform on `[mean - half_width, mean + half_width)`
    Uniform { mean: f64, half_width: f64 },
}

impl Default for EffectSizeDistribution {
    fn default() -> Self {
        EffectSizeDistribution::Normal { mean: 0.0, sd: 1.0 }
    }
}

impl EffectSizeDistribution {
    pub fn sampler(&self) -> Result<Sampler, SimulationError> {
        match *self {
            EffectSizeDistribution::Normal { mean, sd } => normal(mean, sd),
            EffectSizeDistribution::Uniform { mean, half_width } => uniform(mean, half_width),
        }
    }
}

/// Distribution of confounder values in a noise fixed effect group.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum ConfounderDistribution {
    Normal { mean: f64, sd: f64 },
    Uniform { mean: f64, half_width: f64 },
    /// Bernoulli draws (0/1) with success probability `prob`
    Binomial { prob: f64 },
    /// Categories `0..categories`, dummy-encoded before weighting
    Categorical { categories: usize },
}

impl ConfounderDistribution {
    pub fn sampler(&self) -> Result<Sampler, SimulationError> {
        match *self {
            ConfounderDistribution::Normal { mean, sd } => normal(mean, sd),
            ConfounderDistribution::Uniform { mean, half_width } => uniform(mean, half_width),
            ConfounderDistribution::Binomial { prob } => {
                if !(0.0..=1.0).contains(&prob) {
                    return Err(SimulationError::range("prob", prob, "must lie in [0, 1]"));
                }
                let dist = Bernoulli::new(prob)
                    .map_err(|e| SimulationError::range("prob", prob, &e.to_string()))?;
                Ok(Sampler::Bernoulli(dist))
            }
            ConfounderDistribution::Categorical { categories } => {
                if categories < 2 {
                    return Err(SimulationError::range(
                        "categories",
                        categories as f64,
                        "categorical confounders need at least 2 categories",
                    ));
                }
                Ok(Sampler::Categorical {
                    dist: Uniform::new(0, categories),
                    categories,
                })
            }
        }
    }
}

fn normal(mean: f64, sd: f64) -> Result<Sampler, SimulationError> {
    if !mean.is_finite() {
        return Err(SimulationError::range("mean", mean, "must be finite"));
    }
    if !sd.is_finite() || sd < 0.0 {
        return Err(SimulationError::range("sd", sd, "must be finite and non-negative"));
    }
    let dist = Normal::new(mean, sd).map_err(|e| SimulationError::range("sd", sd, &e.to_string()))?;
    Ok(Sampler::Normal(dist))
}

fn uniform(mean: f64, half_width: f64) -> Result<Sampler, SimulationError> {
    if !mean.is_finite() {
        return Err(SimulationError::range("mean", mean, "must be finite"));
    }
    if !half_width.is_finite() || half_width <= 0.0 {
        return Err(SimulationError::range(
            "half_width",
            half_width,
            "must be finite and strictly positive",
        ));
    }
    Ok(Sampler::Uniform(Uniform::new(mean - half_width, mean + half_width)))
}

/// A validated distribution, ready to draw from.
#[derive(Debug, Clone, Copy)]
pub enum Sampler {
    Normal(Normal<f64>),
    Uniform(Uniform<f64>),
    Bernoulli(Bernoulli),
    Categorical { dist: Uniform<usize>, categories: usize },
}

impl Sampler {
    /// Draws one value. Categorical draws return the category index as `f64`.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            Sampler::Normal(d) => d.sample(rng),
            Sampler::Uniform(d) => d.sample(rng),
            Sampler::Bernoulli(d) => {
                if d.sample(rng) {
                    1.0
                } else {
                    0.0
                }
            }
            Sampler::Categorical { dist, .. } => dist.sample(rng) as f64,
        }
    }

    pub fn vector<R: Rng + ?Sized>(&self, len: usize, rng: &mut R) -> Array1<f64> {
        Array1::from_shape_fn(len, |_| self.draw(rng))
    }

    /// Draws a matrix in row-major order.
    pub fn matrix<R: Rng + ?Sized>(&self, rows: usize, cols: usize, rng: &mut R) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |_| self.draw(rng))
    }

    /// Draws `count` confounder variables for `n_samples` samples.
    ///
    /// Categorical confounders are dummy-encoded: each variable expands into
    /// `categories - 1` indicator columns, with category 0 as reference.
    pub fn confounders<R: Rng + ?Sized>(
        &self,
        n_samples: usize,
        count: usize,
        rng: &mut R,
    ) -> Array2<f64> {
        match self {
            Sampler::Categorical { categories, .. } => {
                let width = categories - 1;
                let mut encoded = Array2::zeros((n_samples, count * width));
                for variable in 0..count {
                    for sample in 0..n_samples {
                        let category = self.draw(rng) as usize;
                        if category > 0 {
                            encoded[[sample, variable * width + category - 1]] = 1.0;
                        }
                    }
                }
                encoded
            }
            _ => self.matrix(n_samples, count, rng),
        }
    }
}

/// Standard normal matrix, the building block of the random-effect generators.
pub fn standard_normal_matrix<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |_| rng.sample(rand_distr::StandardNormal))
}

pub fn standard_normal_vector<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Array1<f64> {
    Array1::from_shape_fn(len, |_| rng.sample(rand_distr::StandardNormal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn rejects_negative_sd() {
        let err = EffectSizeDistribution::Normal { mean: 0.0, sd: -1.0 }
            .sampler()
            .unwrap_err();
        assert!(matches!(err, SimulationError::ParameterRange { .. }));
    }

    #[test]
    fn rejects_out_of_range_probability_and_categories() {
        assert!(ConfounderDistribution::Binomial { prob: 1.5 }.sampler().is_err());
        assert!(ConfounderDistribution::Categorical { categories: 1 }.sampler().is_err());
        assert!(ConfounderDistribution::Uniform { mean: 0.0, half_width: 0.0 }
            .sampler()
            .is_err());
    }

    #[test]
    fn uniform_draws_stay_in_range() {
        let sampler = EffectSizeDistribution::Uniform { mean: 1.0, half_width: 0.5 }
            .sampler()
            .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let v = sampler.vector(1000, &mut rng);
        assert!(v.iter().all(|x| (0.5..1.5).contains(x)));
    }

    #[test]
    fn categorical_confounders_are_dummy_encoded() {
        let sampler = ConfounderDistribution::Categorical { categories: 3 }
            .sampler()
            .unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let encoded = sampler.confounders(50, 2, &mut rng);
        assert_eq!(encoded.dim(), (50, 4));
        // at most one indicator per variable and sample
        for row in encoded.rows() {
            assert!(row[0] + row[1] <= 1.0);
            assert!(row[2] + row[3] <= 1.0);
        }
        assert!(encoded.iter().all(|&x| x == 0.0 || x == 1.0));
    }

    #[test]
    fn binomial_confounders_are_binary() {
        let sampler = ConfounderDistribution::Binomial { prob: 0.3 }.sampler().unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let m = sampler.confounders(20, 3, &mut rng);
        assert_eq!(m.dim(), (20, 3));
        assert!(m.iter().all(|&x| x == 0.0 || x == 1.0));
    }
}
