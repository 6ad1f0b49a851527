//! Rescaling of raw effect matrices to their budgeted share of variance.
use crate::budget::VarianceBudget;
use crate::effects::EffectComponent;
use crate::{mean_column_variance, SampleSpace, SimulationError, Slot};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Total phenotype variance the budget fractions refer to.
pub const TOTAL_VARIANCE: f64 = 1.0;

/// Raw variances at or below this are treated as zero.
pub const DEGENERATE_VARIANCE: f64 = 1e-12;

/// One sub-matrix after rescaling, with the numbers used to scale it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RescaledComponent {
    pub slot: Slot,
    pub matrix: Array2<f64>,
    /// Budgeted fraction of total variance
    pub target: f64,
    /// Mean column variance of the raw matrix
    pub raw_variance: f64,
    /// Multiplicative factor applied to the raw matrix
    pub scale: f64,
}

/// Scale factor sqrt(target * total / raw_variance).
///
/// A zero target always gives a zero factor; a positive target on a raw
/// matrix without variance is a `DegenerateComponent` error.
pub fn scale_factor(slot: Slot, target: f64, raw_variance: f64) -> Result<f64, SimulationError> {
    if target <= 0.0 {
        return Ok(0.0);
    }
    if !raw_variance.is_finite() || raw_variance <= DEGENERATE_VARIANCE {
        return Err(SimulationError::DegenerateComponent {
            component: slot.to_string(),
            fraction: target,
        });
    }
    Ok((target * TOTAL_VARIANCE / raw_variance).sqrt())
}

/// Rescales every supplied sub-matrix to its budgeted fraction.
///
/// The budget is validated before any matrix is touched. Components not
/// supplied must have a zero budget; supplied components with a zero
/// budget come back as zero matrices.
pub fn rescale_components(
    space: &SampleSpace,
    components: &[EffectComponent],
    budget: &VarianceBudget,
) -> Result<Vec<RescaledComponent>, SimulationError> {
    budget.validate()?;

    let mut seen = HashSet::new();
    for component in components {
        if !seen.insert(component.kind) {
            return Err(SimulationError::InvalidBudget(format!(
                "component {} supplied more than once",
                component.kind
            )));
        }
        component.check(space)?;
    }

    let mut rescaled = Vec::new();
    for slot in Slot::all() {
        let target = budget.target(slot);
        let raw = components
            .iter()
            .find(|c| c.kind == slot.kind)
            .and_then(|c| c.part(slot.part));

        let raw = match raw {
            Some(m) => m,
            None if target > 0.0 => {
                return Err(SimulationError::DegenerateComponent {
                    component: format!("{} (not generated)", slot),
                    fraction: target,
                })
            }
            None => continue,
        };

        let raw_variance = mean_column_variance(raw);
        let scale = scale_factor(slot, target, raw_variance)?;
        log::debug!(
            "Rescaling {}: target {:.4}, raw variance {:.4e}, factor {:.4e}",
            slot,
            target,
            raw_variance,
            scale
        );
        rescaled.push(RescaledComponent {
            slot,
            matrix: raw * scale,
            target,
            raw_variance,
            scale,
        });
    }

    Ok(rescaled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::standard_normal_matrix;
    use crate::{ComponentKind, Part};
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn noise_only_budget() -> VarianceBudget {
        VarianceBudget::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5).unwrap()
    }

    #[test]
    fn rescaled_variance_matches_target() {
        let mut rng = StdRng::seed_from_u64(1);
        let space = SampleSpace::new(50, 4).unwrap();
        let component = EffectComponent::split(
            ComponentKind::NoiseBg,
            standard_normal_matrix(50, 4, &mut rng) * 3.0,
            standard_normal_matrix(50, 4, &mut rng) * 0.1,
        );
        let rescaled = rescale_components(&space, &[component], &noise_only_budget()).unwrap();
        assert_eq!(rescaled.len(), 2);
        for r in &rescaled {
            assert_abs_diff_eq!(mean_column_variance(&r.matrix), 0.5, epsilon = 1e-10);
        }
    }

    #[test]
    fn missing_component_with_budget_is_degenerate() {
        let space = SampleSpace::new(5, 2).unwrap();
        let err = rescale_components(&space, &[], &noise_only_budget()).unwrap_err();
        assert!(matches!(err, SimulationError::DegenerateComponent { .. }));
    }

    #[test]
    fn zero_variance_component_with_budget_is_degenerate() {
        let space = SampleSpace::new(5, 2).unwrap();
        let component = EffectComponent::split(
            ComponentKind::NoiseBg,
            Array2::from_elem((5, 2), 3.0),
            Array2::ones((5, 2)),
        );
        let err = rescale_components(&space, &[component], &noise_only_budget()).unwrap_err();
        assert!(matches!(err, SimulationError::DegenerateComponent { .. }));
    }

    #[test]
    fn zero_budget_scales_to_zero() {
        let slot = Slot::new(ComponentKind::GeneticFixed, Part::Shared);
        assert_eq!(scale_factor(slot, 0.0, 0.0).unwrap(), 0.0);
        assert_abs_diff_eq!(scale_factor(slot, 0.25, 4.0).unwrap(), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn shape_mismatch_aborts_before_scaling() {
        let space = SampleSpace::new(5, 2).unwrap();
        let component = EffectComponent::split(ComponentKind::NoiseBg, Array2::ones((5, 2)), Array2::ones((4, 2)));
        let err = rescale_components(&space, &[component], &noise_only_budget()).unwrap_err();
        assert!(matches!(err, SimulationError::ShapeMismatch { .. }));
    }

    #[test]
    fn invalid_budget_is_rejected_first() {
        let space = SampleSpace::new(5, 2).unwrap();
        let mut budget = noise_only_budget();
        budget.genetic_variance = 0.5;
        let err = rescale_components(&space, &[], &budget).unwrap_err();
        assert!(matches!(err, SimulationError::InvalidBudget(_)));
    }
}
