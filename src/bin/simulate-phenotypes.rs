//! Simulate Phenotypes
//!
//! This binary builds a `SimulationConfig` from command-line arguments,
//! optionally loads genotypes and a kinship matrix, runs the simulation
//! and writes the phenotype, its components and the variance report to
//! an output directory.

use clap::Parser;
use phenosim_rust::{
    distributions::{ConfounderDistribution, EffectSizeDistribution},
    effects::{noise::ConfounderGroup, EffectSplit},
    io::{default_sample_ids, read_kinship, read_matrix, save_simulation_output},
    kinship::{load_kinship_from_file, save_kinship_to_file},
    pipeline::{
        run_simulation, CorrelatedNoiseParams, GeneticFixedParams, GenotypeSource, LogReporter,
        NoiseBgParams, NoiseFixedParams, SimulationConfig, SimulationInputs,
    },
    VarianceBudget,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "simulate-phenotypes",
    version,
    about = "Simulates multi-trait phenotypes from genetic and noise effect components"
)]
struct Cli {
    /// Number of samples
    #[arg(long, required = true)]
    n_samples: usize,

    /// Number of traits
    #[arg(long, required = true)]
    n_traits: usize,

    /// Seed for the random number generator
    #[arg(long, default_value_t = 1234)]
    seed: u64,

    /// Output directory
    #[arg(long, required = true)]
    out_dir: PathBuf,

    /// Gzip-compress the output matrices
    #[arg(long, default_value_t = false)]
    gzip: bool,

    /// Number of threads to use
    #[arg(long, default_value_t = 1)]
    n_threads: usize,

    // ------------------------------------------------------------------
    // Variance budget
    // ------------------------------------------------------------------
    /// Proportion of variance explained by genetic effects
    #[arg(long, required = true)]
    gen_var: f64,

    /// Proportion of genetic variance explained by causal SNP effects
    #[arg(long, default_value_t = 0.0)]
    h2s: f64,

    /// Shared proportion of causal SNP variance
    #[arg(long, default_value_t = 0.8)]
    theta: f64,

    /// Shared proportion of genetic background variance
    #[arg(long, default_value_t = 0.8)]
    eta: f64,

    /// Proportion of noise variance explained by confounders
    #[arg(long, default_value_t = 0.0)]
    delta: f64,

    /// Shared proportion of confounder variance
    #[arg(long, default_value_t = 0.8)]
    gamma: f64,

    /// Proportion of noise variance explained by correlated noise
    #[arg(long, default_value_t = 0.0)]
    rho: f64,

    /// Shared proportion of background noise variance
    #[arg(long, default_value_t = 0.8)]
    alpha: f64,

    // ------------------------------------------------------------------
    // Genotypes and kinship
    // ------------------------------------------------------------------
    /// Tab-separated genotype file (samples x SNPs, first column = sample ID)
    #[arg(long)]
    genotype_file: Option<PathBuf>,

    /// Kinship file: tab-separated table or a `.bin` cache
    #[arg(long)]
    kinship_file: Option<PathBuf>,

    /// The kinship file is already normalised
    #[arg(long, default_value_t = false)]
    kinship_normalised: bool,

    /// Write the kinship used by the run to this `.bin` cache
    #[arg(long)]
    save_kinship: Option<PathBuf>,

    /// Number of SNPs to simulate when no genotype file is given
    #[arg(long, default_value_t = 5000)]
    n_snps: usize,

    /// Allele frequencies for simulated SNPs, comma-separated
    #[arg(long, default_value = "0.1,0.2,0.4", value_delimiter = ',')]
    frequencies: Vec<f64>,

    // ------------------------------------------------------------------
    // Genetic fixed effects
    // ------------------------------------------------------------------
    /// Number of causal SNPs
    #[arg(long, default_value_t = 20)]
    n_causal: usize,

    /// Proportion of causal SNPs with trait-independent effects
    #[arg(long, default_value_t = 0.4)]
    p_independent_genetic: f64,

    /// Proportion of traits affected by independent SNP effects
    #[arg(long, default_value_t = 0.2)]
    p_trait_independent_genetic: f64,

    /// Effect size distribution: 'norm' or 'unif'
    #[arg(long, default_value = "norm")]
    dist_beta: String,

    /// Effect size mean
    #[arg(long, default_value_t = 0.0)]
    mean_beta: f64,

    /// Effect size sd (normal) or half width (uniform)
    #[arg(long, default_value_t = 1.0)]
    sd_beta: f64,

    // ------------------------------------------------------------------
    // Noise fixed effects (one value per confounder group)
    // ------------------------------------------------------------------
    /// Number of confounders per group, comma-separated
    #[arg(long, default_value = "10", value_delimiter = ',')]
    n_confounders: Vec<usize>,

    /// Confounder distribution per group: 'norm', 'unif', 'bin' or 'cat'
    #[arg(long, default_value = "norm", value_delimiter = ',')]
    dist_confounders: Vec<String>,

    /// Confounder mean per group (norm, unif)
    #[arg(long, default_value = "0", value_delimiter = ',')]
    mean_confounders: Vec<f64>,

    /// Confounder sd (norm) or half width (unif) per group
    #[arg(long, default_value = "1", value_delimiter = ',')]
    sd_confounders: Vec<f64>,

    /// Success probability per group (bin)
    #[arg(long, default_value = "0.5", value_delimiter = ',')]
    prob_confounders: Vec<f64>,

    /// Number of categories per group (cat)
    #[arg(long, default_value = "3", value_delimiter = ',')]
    cat_confounders: Vec<usize>,

    /// Proportion of independent confounders per group
    #[arg(long, default_value = "0.4", value_delimiter = ',')]
    p_independent_confounders: Vec<f64>,

    /// Proportion of traits affected by independent confounders per group
    #[arg(long, default_value = "0.2", value_delimiter = ',')]
    p_trait_independent_confounders: Vec<f64>,

    // ------------------------------------------------------------------
    // Correlated and background noise
    // ------------------------------------------------------------------
    /// Correlation between neighbouring traits
    #[arg(long, default_value_t = 0.8)]
    pcorr: f64,

    /// Mean of background noise
    #[arg(long, default_value_t = 0.0)]
    mean_noise: f64,

    /// Standard deviation of background noise
    #[arg(long, default_value_t = 1.0)]
    sd_noise: f64,
}

/// Value for group `i`; a single value applies to every group.
fn per_group<T: Copy>(values: &[T], i: usize, name: &str) -> Result<T, String> {
    match values {
        [single] => Ok(*single),
        _ => values
            .get(i)
            .copied()
            .ok_or_else(|| format!("--{} has {} values but group {} was requested", name, values.len(), i + 1)),
    }
}

fn effect_size_distribution(cli: &Cli) -> Result<EffectSizeDistribution, String> {
    match cli.dist_beta.to_lowercase().as_str() {
        "norm" | "normal" => Ok(EffectSizeDistribution::Normal { mean: cli.mean_beta, sd: cli.sd_beta }),
        "unif" | "uniform" => Ok(EffectSizeDistribution::Uniform { mean: cli.mean_beta, half_width: cli.sd_beta }),
        other => Err(format!("Unknown effect size distribution '{}'. Use 'norm' or 'unif'.", other)),
    }
}

fn confounder_groups(cli: &Cli) -> Result<Vec<ConfounderGroup>, String> {
    (0..cli.n_confounders.len())
        .map(|i| -> Result<ConfounderGroup, String> {
            let dist = per_group(&cli.dist_confounders.iter().map(String::as_str).collect::<Vec<_>>(), i, "dist-confounders")?;
            let distribution = match dist.to_lowercase().as_str() {
                "norm" | "normal" => ConfounderDistribution::Normal {
                    mean: per_group(&cli.mean_confounders, i, "mean-confounders")?,
                    sd: per_group(&cli.sd_confounders, i, "sd-confounders")?,
                },
                "unif" | "uniform" => ConfounderDistribution::Uniform {
                    mean: per_group(&cli.mean_confounders, i, "mean-confounders")?,
                    half_width: per_group(&cli.sd_confounders, i, "sd-confounders")?,
                },
                "bin" | "binomial" => ConfounderDistribution::Binomial {
                    prob: per_group(&cli.prob_confounders, i, "prob-confounders")?,
                },
                "cat" | "categorical" => ConfounderDistribution::Categorical {
                    categories: per_group(&cli.cat_confounders, i, "cat-confounders")?,
                },
                other => {
                    return Err(format!(
                        "Unknown confounder distribution '{}'. Use 'norm', 'unif', 'bin' or 'cat'.",
                        other
                    ))
                }
            };
            Ok(ConfounderGroup {
                n_confounders: cli.n_confounders[i],
                distribution,
                split: EffectSplit {
                    p_independent: per_group(&cli.p_independent_confounders, i, "p-independent-confounders")?,
                    p_trait_independent: per_group(
                        &cli.p_trait_independent_confounders,
                        i,
                        "p-trait-independent-confounders",
                    )?,
                },
            })
        })
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    log::info!("Starting phenotype simulation");
    log::info!("Samples: {}, traits: {}, seed: {}", cli.n_samples, cli.n_traits, cli.seed);
    log::info!("Using {} threads", cli.n_threads);

    // Set the global thread pool for rayon
    rayon::ThreadPoolBuilder::new()
        .num_threads(cli.n_threads)
        .build_global()?;

    // ===================================================================
    // 1. Build the configuration
    // ===================================================================
    let budget = VarianceBudget::new(
        cli.gen_var, cli.h2s, cli.theta, cli.eta, cli.delta, cli.gamma, cli.rho, cli.alpha,
    )?;

    let mut config = SimulationConfig::new(cli.n_samples, cli.n_traits, cli.seed, budget);
    config.genotypes = GenotypeSource::Simulated {
        n_snps: cli.n_snps,
        frequencies: cli.frequencies.clone(),
    };
    config.genetic_fixed = Some(GeneticFixedParams {
        n_causal: cli.n_causal,
        split: EffectSplit {
            p_independent: cli.p_independent_genetic,
            p_trait_independent: cli.p_trait_independent_genetic,
        },
        effect_sizes: effect_size_distribution(&cli)?,
        standardise: true,
    });
    config.noise_fixed = Some(NoiseFixedParams {
        groups: confounder_groups(&cli)?,
        effect_sizes: effect_size_distribution(&cli)?,
    });
    config.correlated_noise = Some(CorrelatedNoiseParams { pcorr: cli.pcorr });
    config.noise_bg = NoiseBgParams {
        mean: cli.mean_noise,
        sd: cli.sd_noise,
    };

    // ===================================================================
    // 2. Load genotypes and kinship
    // ===================================================================
    let mut inputs = SimulationInputs {
        kinship_normalised: cli.kinship_normalised,
        ..Default::default()
    };
    let mut sample_ids: Option<Vec<String>> = None;

    if let Some(path) = &cli.genotype_file {
        let genotypes = read_matrix(path)?;
        log::info!("Loaded {} SNPs for {} samples", genotypes.values.ncols(), genotypes.values.nrows());
        sample_ids = Some(genotypes.row_ids);
        inputs.genotypes = Some(genotypes.values);
        config.genotypes = GenotypeSource::Supplied;
    }

    if let Some(path) = &cli.kinship_file {
        let (kinship, ids) = if path.extension().map(|e| e == "bin").unwrap_or(false) {
            let data = load_kinship_from_file(path)?;
            (data.kinship, data.sample_ids)
        } else {
            let data = read_kinship(path)?;
            (data.values, data.row_ids)
        };
        if let Some(existing) = &sample_ids {
            if existing != &ids {
                return Err("Sample IDs in the kinship file do not match the genotype file".into());
            }
        }
        sample_ids = Some(ids);
        inputs.kinship = Some(kinship);
    }

    let sample_ids = sample_ids.unwrap_or_else(|| default_sample_ids(cli.n_samples));
    if sample_ids.len() != cli.n_samples {
        return Err(format!(
            "Input files contain {} samples but --n-samples is {}",
            sample_ids.len(),
            cli.n_samples
        )
        .into());
    }

    // ===================================================================
    // 3. Simulate
    // ===================================================================
    let output = run_simulation(&config, inputs, &LogReporter)?;

    for entry in &output.phenotype.report.entries {
        log::info!(
            "  {:<28} budgeted {:.4}  realised {:.4}",
            entry.slot.to_string(),
            entry.budgeted,
            entry.realized
        );
    }

    // ===================================================================
    // 4. Save output
    // ===================================================================
    if let (Some(path), Some(kinship)) = (&cli.save_kinship, &output.kinship) {
        save_kinship_to_file(path, kinship, &sample_ids)?;
    }

    save_simulation_output(&cli.out_dir, &output, &sample_ids, cli.gzip)?;

    let config_file = cli.out_dir.join("simulation_config.bin");
    log::info!("Saving configuration to {:?}", &config_file);
    let file = std::fs::File::create(&config_file)?;
    let writer = std::io::BufWriter::new(file);
    bincode::serialize_into(writer, &config)?;

    log::info!("Simulation completed successfully.");
    Ok(())
}
