//! Module wiring providers, generators, rescaling and composition together.
use crate::budget::VarianceBudget;
use crate::compose::{compose_phenotype, Phenotype};
use crate::distributions::EffectSizeDistribution;
use crate::effects::genetic::genetic_bg_effects_from_factor;
use crate::effects::noise::ConfounderGroup;
use crate::effects::{
    check_fraction, correlated_noise_effects, genetic_fixed_effects, noise_bg_effects,
    noise_fixed_effects, EffectComponent, EffectSplit,
};
use crate::genotypes::{select_causal_variants, simulate_genotypes, standardise_genotypes, DEFAULT_ALLELE_FREQUENCIES};
use crate::kinship::{check_kinship, kinship_factor, kinship_from_genotypes, normalise_kinship};
use crate::rescale::{rescale_components, RescaledComponent};
use crate::{ComponentKind, SampleSpace, SimulationError};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Receives progress messages from the pipeline.
pub trait ProgressReporter {
    fn stage(&self, message: &str);
}

/// Forwards progress to the `log` facade at info level.
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn stage(&self, message: &str) {
        log::info!("{}", message);
    }
}

/// Discards progress messages.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn stage(&self, _message: &str) {}
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GeneticFixedParams {
    /// Number of causal variants drawn from the genotypes
    pub n_causal: usize,
    pub split: EffectSplit,
    pub effect_sizes: EffectSizeDistribution,
    /// Standardise causal genotypes before applying effect sizes
    pub standardise: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NoiseFixedParams {
    pub groups: Vec<ConfounderGroup>,
    pub effect_sizes: EffectSizeDistribution,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CorrelatedNoiseParams {
    pub pcorr: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct NoiseBgParams {
    pub mean: f64,
    pub sd: f64,
}

impl Default for NoiseBgParams {
    fn default() -> Self {
        NoiseBgParams { mean: 0.0, sd: 1.0 }
    }
}

/// Where genotypes come from when genetic effects need them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum GenotypeSource {
    Simulated { n_snps: usize, frequencies: Vec<f64> },
    /// Taken from [`SimulationInputs::genotypes`]
    Supplied,
}

impl Default for GenotypeSource {
    fn default() -> Self {
        GenotypeSource::Simulated {
            n_snps: 5000,
            frequencies: DEFAULT_ALLELE_FREQUENCIES.to_vec(),
        }
    }
}

/// Everything needed to reproduce one simulation run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub n_samples: usize,
    pub n_traits: usize,
    pub seed: u64,
    pub budget: VarianceBudget,
    pub genotypes: GenotypeSource,
    pub genetic_fixed: Option<GeneticFixedParams>,
    pub noise_fixed: Option<NoiseFixedParams>,
    pub correlated_noise: Option<CorrelatedNoiseParams>,
    pub noise_bg: NoiseBgParams,
}

impl SimulationConfig {
    /// Config with default generator parameters for the given budget.
    pub fn new(n_samples: usize, n_traits: usize, seed: u64, budget: VarianceBudget) -> Self {
        SimulationConfig {
            n_samples,
            n_traits,
            seed,
            budget,
            genotypes: GenotypeSource::default(),
            genetic_fixed: None,
            noise_fixed: None,
            correlated_noise: None,
            noise_bg: NoiseBgParams::default(),
        }
    }

    pub fn space(&self) -> Result<SampleSpace, SimulationError> {
        SampleSpace::new(self.n_samples, self.n_traits)
    }

    /// Checks dimensions, the budget and the parameters of every active
    /// component. No random draws happen before this succeeds.
    pub fn validate(&self) -> Result<(), SimulationError> {
        self.space()?;
        self.budget.validate()?;

        if let GenotypeSource::Simulated { n_snps, frequencies } = &self.genotypes {
            if *n_snps == 0 {
                return Err(SimulationError::range("n_snps", 0.0, "must be at least 1"));
            }
            if let Some(&bad) = frequencies.iter().find(|f| !(**f > 0.0 && **f < 1.0)) {
                return Err(SimulationError::range("frequencies", bad, "allele frequencies must lie in (0, 1)"));
            }
        }

        if self.budget.is_active(ComponentKind::GeneticFixed) {
            let params = self.params_for(ComponentKind::GeneticFixed, self.genetic_fixed.as_ref())?;
            params.split.validate("genetic_fixed")?;
            params.effect_sizes.sampler()?;
        }
        if self.budget.is_active(ComponentKind::NoiseFixed) {
            let params = self.params_for(ComponentKind::NoiseFixed, self.noise_fixed.as_ref())?;
            params.effect_sizes.sampler()?;
            for (i, group) in params.groups.iter().enumerate() {
                group.split.validate(&format!("confounder_group[{}]", i))?;
                group.distribution.sampler()?;
            }
        }
        if self.budget.is_active(ComponentKind::NoiseCorrelated) {
            let params = self.params_for(ComponentKind::NoiseCorrelated, self.correlated_noise.as_ref())?;
            check_fraction("pcorr", params.pcorr)?;
        }
        if self.budget.is_active(ComponentKind::NoiseBg) {
            EffectSizeDistribution::Normal {
                mean: self.noise_bg.mean,
                sd: self.noise_bg.sd,
            }
            .sampler()?;
        }
        Ok(())
    }

    fn params_for<'a, T>(&self, kind: ComponentKind, params: Option<&'a T>) -> Result<&'a T, SimulationError> {
        params.ok_or_else(|| {
            SimulationError::InvalidBudget(format!(
                "{} has fraction {} but no generation parameters",
                kind,
                self.budget.component_target(kind)
            ))
        })
    }

    fn needs_genotypes(&self, inputs: &SimulationInputs) -> bool {
        self.budget.is_active(ComponentKind::GeneticFixed)
            || (self.budget.is_active(ComponentKind::GeneticBg) && inputs.kinship.is_none())
    }
}

/// Matrices supplied by the caller instead of being simulated.
#[derive(Debug, Clone, Default)]
pub struct SimulationInputs {
    /// N x M genotypes, used with [`GenotypeSource::Supplied`]
    pub genotypes: Option<Array2<f64>>,
    /// N x N kinship; computed from the genotypes when absent
    pub kinship: Option<Array2<f64>>,
    /// Whether `kinship` is already mean-diagonal normalised
    pub kinship_normalised: bool,
}

/// Result of a full simulation run.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SimulationOutput {
    pub phenotype: Phenotype,
    /// Rescaled sub-matrices that were summed into the phenotype
    pub components: Vec<RescaledComponent>,
    /// Column indices of the causal variants, if any were selected
    pub causal_variants: Vec<usize>,
    pub genotypes: Option<Array2<f64>>,
    pub kinship: Option<Array2<f64>>,
}

/// Runs the whole simulation: genotypes and kinship, effect generation,
/// rescaling and composition.
pub fn run_simulation(
    config: &SimulationConfig,
    inputs: SimulationInputs,
    reporter: &dyn ProgressReporter,
) -> Result<SimulationOutput, SimulationError> {
    config.validate()?;
    let space = config.space()?;
    let budget = &config.budget;
    let mut rng = StdRng::seed_from_u64(config.seed);

    reporter.stage(&format!(
        "Simulating {} traits for {} samples (seed {})",
        space.n_traits, space.n_samples, config.seed
    ));

    // ===================================================================
    // 1. Genotypes and kinship
    // ===================================================================
    let genotypes = if config.needs_genotypes(&inputs) {
        let g = match &config.genotypes {
            GenotypeSource::Simulated { n_snps, frequencies } => {
                reporter.stage(&format!("Simulating {} genotypes", n_snps));
                simulate_genotypes(space.n_samples, *n_snps, frequencies, &mut rng)?
            }
            GenotypeSource::Supplied => inputs.genotypes.clone().ok_or_else(|| {
                SimulationError::InvalidBudget("genetic effects requested but no genotypes supplied".into())
            })?,
        };
        if g.nrows() != space.n_samples {
            return Err(SimulationError::ShapeMismatch {
                component: "genotypes".into(),
                expected: (space.n_samples, g.ncols()),
                actual: g.dim(),
            });
        }
        Some(g)
    } else {
        inputs.genotypes.clone()
    };

    let kinship = if budget.is_active(ComponentKind::GeneticBg) {
        let k = match (&inputs.kinship, &genotypes) {
            (Some(k), _) if inputs.kinship_normalised => {
                check_kinship(k)?;
                k.clone()
            }
            (Some(k), _) => normalise_kinship(k)?,
            (None, Some(g)) => {
                reporter.stage("Estimating kinship from genotypes");
                normalise_kinship(&kinship_from_genotypes(g)?)?
            }
            (None, None) => {
                return Err(SimulationError::InvalidBudget(
                    "genetic background effects requested without kinship or genotypes".into(),
                ))
            }
        };
        if k.dim() != (space.n_samples, space.n_samples) {
            return Err(SimulationError::ShapeMismatch {
                component: "kinship".into(),
                expected: (space.n_samples, space.n_samples),
                actual: k.dim(),
            });
        }
        Some(k)
    } else {
        inputs.kinship.clone()
    };

    // ===================================================================
    // 2. Effect components
    // ===================================================================
    let mut components: Vec<EffectComponent> = Vec::new();
    let mut causal_variants = Vec::new();

    if let (Some(params), Some(g)) = (&config.genetic_fixed, &genotypes) {
        if budget.is_active(ComponentKind::GeneticFixed) {
            reporter.stage(&format!("Generating genetic fixed effects from {} causal variants", params.n_causal));
            let (causal, idx) = select_causal_variants(g, params.n_causal, &mut rng)?;
            let causal = if params.standardise {
                standardise_genotypes(&causal)
            } else {
                causal
            };
            causal_variants = idx;
            components.push(genetic_fixed_effects(
                &causal,
                space.n_traits,
                &params.split,
                &params.effect_sizes,
                &mut rng,
            )?);
        }
    }

    if let Some(k) = &kinship {
        if budget.is_active(ComponentKind::GeneticBg) {
            reporter.stage("Generating genetic background effects");
            let factor = kinship_factor(k)?;
            components.push(genetic_bg_effects_from_factor(&factor, space.n_traits, &mut rng));
        }
    }

    if let Some(params) = &config.noise_fixed {
        if budget.is_active(ComponentKind::NoiseFixed) {
            reporter.stage(&format!("Generating noise fixed effects from {} confounder groups", params.groups.len()));
            components.push(noise_fixed_effects(
                space.n_samples,
                space.n_traits,
                &params.groups,
                &params.effect_sizes,
                &mut rng,
            )?);
        }
    }

    if let Some(params) = &config.correlated_noise {
        if budget.is_active(ComponentKind::NoiseCorrelated) {
            reporter.stage(&format!("Generating correlated noise (pcorr = {})", params.pcorr));
            components.push(correlated_noise_effects(
                space.n_samples,
                space.n_traits,
                params.pcorr,
                &mut rng,
            )?);
        }
    }

    if budget.is_active(ComponentKind::NoiseBg) {
        reporter.stage("Generating background noise effects");
        components.push(noise_bg_effects(
            space.n_samples,
            space.n_traits,
            config.noise_bg.mean,
            config.noise_bg.sd,
            &mut rng,
        )?);
    }

    // ===================================================================
    // 3. Rescale and compose
    // ===================================================================
    reporter.stage(&format!("Rescaling {} components", components.len()));
    let rescaled = rescale_components(&space, &components, budget)?;
    let phenotype = compose_phenotype(&space, &rescaled)?;
    reporter.stage(&format!(
        "Phenotype composed: genetic variance {:.3} (budget {:.3}), max deviation {:.3}",
        phenotype.report.genetic_realized(),
        budget.genetic_variance,
        phenotype.report.max_deviation()
    ));

    Ok(SimulationOutput {
        phenotype,
        components: rescaled,
        causal_variants,
        genotypes,
        kinship,
    })
}
