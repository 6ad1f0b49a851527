//! Variance budget: how total phenotype variance is split between components.
use crate::{ComponentKind, Part, SimulationError, Slot};
use serde::{Deserialize, Serialize};

/// Tolerance used when checking that grouped fractions sum to one.
pub const BUDGET_TOLERANCE: f64 = 1e-6;

/// Nested fractional allocation of phenotype variance.
///
/// Total variance splits into `genetic_variance + noise_variance`. Genetic
/// variance splits into fixed SNP effects (`h2s`) and background (`h2bg`);
/// noise splits into fixed (`delta`), correlated (`rho`) and background
/// (`phi`). `theta`, `eta`, `gamma` and `alpha` give the shared fraction of
/// genetic fixed, genetic background, noise fixed and noise background
/// effects respectively.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct VarianceBudget {
    pub genetic_variance: f64,
    pub noise_variance: f64,
    pub h2s: f64,
    pub h2bg: f64,
    pub theta: f64,
    pub eta: f64,
    pub delta: f64,
    pub rho: f64,
    pub phi: f64,
    pub gamma: f64,
    pub alpha: f64,
}

impl VarianceBudget {
    /// Builds a budget from the independent knobs. `noise_variance`, `h2bg`
    /// and `phi` are derived; the result is validated.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        genetic_variance: f64,
        h2s: f64,
        theta: f64,
        eta: f64,
        delta: f64,
        gamma: f64,
        rho: f64,
        alpha: f64,
    ) -> Result<Self, SimulationError> {
        let budget = VarianceBudget {
            genetic_variance,
            noise_variance: 1.0 - genetic_variance,
            h2s,
            h2bg: 1.0 - h2s,
            theta,
            eta,
            delta,
            rho,
            phi: 1.0 - delta - rho,
            gamma,
            alpha,
        };
        budget.validate()?;
        Ok(budget)
    }

    /// Rejects fractions outside [0, 1] and groups not summing to one.
    pub fn validate(&self) -> Result<(), SimulationError> {
        let knobs = [
            ("genetic_variance", self.genetic_variance),
            ("noise_variance", self.noise_variance),
            ("h2s", self.h2s),
            ("h2bg", self.h2bg),
            ("theta", self.theta),
            ("eta", self.eta),
            ("delta", self.delta),
            ("rho", self.rho),
            ("phi", self.phi),
            ("gamma", self.gamma),
            ("alpha", self.alpha),
        ];
        for (name, value) in knobs {
            if !value.is_finite() || value < -BUDGET_TOLERANCE || value > 1.0 + BUDGET_TOLERANCE {
                return Err(SimulationError::InvalidBudget(format!(
                    "{} = {} must lie in [0, 1]",
                    name, value
                )));
            }
        }

        check_sum(
            "genetic_variance + noise_variance",
            self.genetic_variance + self.noise_variance,
        )?;
        check_sum("h2s + h2bg", self.h2s + self.h2bg)?;
        check_sum("delta + rho + phi", self.delta + self.rho + self.phi)?;

        let total: f64 = self.targets().iter().map(|(_, f)| f).sum();
        check_sum("sum of component fractions", total)
    }

    /// Fraction of total variance budgeted for one slot.
    pub fn target(&self, slot: Slot) -> f64 {
        let genetic = self.genetic_variance;
        let noise = self.noise_variance;
        let fraction = match (slot.kind, slot.part) {
            (ComponentKind::GeneticFixed, Part::Shared) => genetic * self.h2s * self.theta,
            (ComponentKind::GeneticFixed, Part::Independent) => genetic * self.h2s * (1.0 - self.theta),
            (ComponentKind::GeneticBg, Part::Shared) => genetic * self.h2bg * self.eta,
            (ComponentKind::GeneticBg, Part::Independent) => genetic * self.h2bg * (1.0 - self.eta),
            (ComponentKind::NoiseFixed, Part::Shared) => noise * self.delta * self.gamma,
            (ComponentKind::NoiseFixed, Part::Independent) => noise * self.delta * (1.0 - self.gamma),
            (ComponentKind::NoiseCorrelated, Part::Combined) => noise * self.rho,
            (ComponentKind::NoiseBg, Part::Shared) => noise * self.phi * self.alpha,
            (ComponentKind::NoiseBg, Part::Independent) => noise * self.phi * (1.0 - self.alpha),
            _ => 0.0,
        };
        // clamp rounding residue from derived knobs such as 1 - 0.7 - 0.3
        fraction.max(0.0)
    }

    /// Targets for all nine slots.
    pub fn targets(&self) -> Vec<(Slot, f64)> {
        Slot::all().into_iter().map(|slot| (slot, self.target(slot))).collect()
    }

    /// Total fraction budgeted for a component (all of its parts).
    pub fn component_target(&self, kind: ComponentKind) -> f64 {
        kind.parts()
            .iter()
            .map(|part| self.target(Slot::new(kind, *part)))
            .sum()
    }

    /// Whether the component needs to be generated at all.
    pub fn is_active(&self, kind: ComponentKind) -> bool {
        self.component_target(kind) > 0.0
    }
}

fn check_sum(what: &str, sum: f64) -> Result<(), SimulationError> {
    if (sum - 1.0).abs() > BUDGET_TOLERANCE {
        return Err(SimulationError::InvalidBudget(format!(
            "{} = {} must equal 1",
            what, sum
        )));
    }
    Ok(())
}
