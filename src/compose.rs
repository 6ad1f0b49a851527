//! Composition of rescaled components into the final phenotype.
use crate::rescale::{RescaledComponent, DEGENERATE_VARIANCE};
use crate::{mean_column_variance, ComponentKind, SampleSpace, SimulationError, Slot};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Budgeted and realised variance of one sub-matrix.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ComponentVariance {
    pub slot: Slot,
    /// Fraction requested in the budget
    pub budgeted: f64,
    /// Mean column variance of the rescaled matrix
    pub variance: f64,
    /// `variance` divided by the phenotype variance
    pub realized: f64,
}

/// Variance bookkeeping for a composed phenotype.
///
/// Realised fractions are measured against the phenotype itself, so they
/// include the effect of covariance between components; `cross_covariance`
/// is the part of phenotype variance not explained by the components alone.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VarianceReport {
    pub entries: Vec<ComponentVariance>,
    pub phenotype_variance: f64,
}

impl VarianceReport {
    pub fn entry(&self, slot: Slot) -> Option<&ComponentVariance> {
        self.entries.iter().find(|e| e.slot == slot)
    }

    pub fn realized(&self, slot: Slot) -> f64 {
        self.entry(slot).map(|e| e.realized).unwrap_or(0.0)
    }

    pub fn budgeted(&self, slot: Slot) -> f64 {
        self.entry(slot).map(|e| e.budgeted).unwrap_or(0.0)
    }

    fn sum_where<F: Fn(&ComponentVariance) -> bool, G: Fn(&ComponentVariance) -> f64>(
        &self,
        filter: F,
        value: G,
    ) -> f64 {
        self.entries.iter().filter(|e| filter(e)).map(value).sum()
    }

    /// Realised fraction of one component, all parts together.
    pub fn component_realized(&self, kind: ComponentKind) -> f64 {
        self.sum_where(|e| e.slot.kind == kind, |e| e.realized)
    }

    pub fn component_budgeted(&self, kind: ComponentKind) -> f64 {
        self.sum_where(|e| e.slot.kind == kind, |e| e.budgeted)
    }

    pub fn genetic_realized(&self) -> f64 {
        self.sum_where(|e| e.slot.kind.is_genetic(), |e| e.realized)
    }

    pub fn noise_realized(&self) -> f64 {
        self.sum_where(|e| !e.slot.kind.is_genetic(), |e| e.realized)
    }

    pub fn genetic_budgeted(&self) -> f64 {
        self.sum_where(|e| e.slot.kind.is_genetic(), |e| e.budgeted)
    }

    /// 1 - sum of realised fractions: the covariance between components
    /// relative to the phenotype variance.
    pub fn cross_covariance(&self) -> f64 {
        1.0 - self.sum_where(|_| true, |e| e.realized)
    }

    /// Largest absolute difference between budgeted and realised fractions.
    pub fn max_deviation(&self) -> f64 {
        self.entries
            .iter()
            .map(|e| (e.budgeted - e.realized).abs())
            .fold(0.0, f64::max)
    }
}

/// Final phenotype and its variance report.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Phenotype {
    pub values: Array2<f64>,
    pub report: VarianceReport,
}

/// Sums all rescaled components into the N x P phenotype.
///
/// All-or-nothing: any shape mismatch aborts without a partial result.
pub fn compose_phenotype(
    space: &SampleSpace,
    components: &[RescaledComponent],
) -> Result<Phenotype, SimulationError> {
    for component in components {
        space.check(&component.slot.to_string(), &component.matrix)?;
    }

    let mut values = space.zeros();
    for component in components {
        values += &component.matrix;
    }

    let phenotype_variance = mean_column_variance(&values);
    if phenotype_variance <= DEGENERATE_VARIANCE {
        return Err(SimulationError::DegenerateComponent {
            component: "phenotype".into(),
            fraction: 1.0,
        });
    }

    let entries = components
        .iter()
        .map(|c| {
            let variance = mean_column_variance(&c.matrix);
            ComponentVariance {
                slot: c.slot,
                budgeted: c.target,
                variance,
                realized: variance / phenotype_variance,
            }
        })
        .collect();

    let report = VarianceReport {
        entries,
        phenotype_variance,
    };
    log::info!(
        "Composed phenotype ({} x {}): genetic {:.3} realised vs {:.3} budgeted",
        space.n_samples,
        space.n_traits,
        report.genetic_realized(),
        report.genetic_budgeted()
    );
    for kind in ComponentKind::ALL {
        log::debug!(
            "  {}: {:.4} realised vs {:.4} budgeted",
            kind,
            report.component_realized(kind),
            report.component_budgeted(kind)
        );
    }

    Ok(Phenotype { values, report })
}

/// Pearson correlation between every pair of trait columns (P x P).
///
/// Pairs involving a constant column are reported as 0.
pub fn trait_correlation(values: &Array2<f64>) -> Array2<f64> {
    let n = values.nrows();
    let p = values.ncols();
    if n == 0 {
        return Array2::zeros((p, p));
    }
    let means = values.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(p));
    let centred = values - &means;
    let covariance = centred.t().dot(&centred) / n as f64;
    let sd = covariance.diag().mapv(f64::sqrt);
    Array2::from_shape_fn((p, p), |(i, j)| {
        let denom = sd[i] * sd[j];
        if denom > DEGENERATE_VARIANCE {
            covariance[[i, j]] / denom
        } else {
            0.0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ComponentKind, Part};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn rescaled(kind: ComponentKind, part: Part, matrix: Array2<f64>, target: f64) -> RescaledComponent {
        RescaledComponent {
            slot: Slot::new(kind, part),
            matrix,
            target,
            raw_variance: 1.0,
            scale: 1.0,
        }
    }

    #[test]
    fn orthogonal_components_realise_their_budget_exactly() {
        let space = SampleSpace::new(4, 1).unwrap();
        // centred, orthogonal columns: variances 1 and 3
        let a = array![[1.0], [-1.0], [1.0], [-1.0]];
        let b = array![[3.0f64.sqrt()], [3.0f64.sqrt()], [-(3.0f64.sqrt())], [-(3.0f64.sqrt())]];
        let components = vec![
            rescaled(ComponentKind::GeneticBg, Part::Shared, a, 0.25),
            rescaled(ComponentKind::NoiseBg, Part::Independent, b, 0.75),
        ];
        let phenotype = compose_phenotype(&space, &components).unwrap();
        assert_abs_diff_eq!(phenotype.report.phenotype_variance, 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(phenotype.report.genetic_realized(), 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(phenotype.report.noise_realized(), 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(phenotype.report.cross_covariance(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(phenotype.report.max_deviation(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn composition_is_the_elementwise_sum() {
        let space = SampleSpace::new(2, 2).unwrap();
        let components = vec![
            rescaled(ComponentKind::NoiseBg, Part::Shared, array![[1.0, 2.0], [3.0, 4.0]], 0.5),
            rescaled(ComponentKind::NoiseBg, Part::Independent, array![[0.5, 0.0], [0.0, 0.5]], 0.5),
        ];
        let phenotype = compose_phenotype(&space, &components).unwrap();
        assert_eq!(phenotype.values, array![[1.5, 2.0], [3.0, 4.5]]);
    }

    #[test]
    fn mismatched_component_aborts_composition() {
        let space = SampleSpace::new(2, 2).unwrap();
        let components = vec![rescaled(ComponentKind::NoiseBg, Part::Shared, Array2::ones((3, 2)), 1.0)];
        assert!(matches!(
            compose_phenotype(&space, &components),
            Err(SimulationError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn empty_composition_is_degenerate() {
        let space = SampleSpace::new(2, 2).unwrap();
        assert!(matches!(
            compose_phenotype(&space, &[]),
            Err(SimulationError::DegenerateComponent { .. })
        ));
    }

    #[test]
    fn component_totals_sum_their_parts() {
        let space = SampleSpace::new(4, 1).unwrap();
        let a = array![[1.0], [-1.0], [1.0], [-1.0]];
        let b = array![[1.0], [1.0], [-1.0], [-1.0]];
        let c = array![[1.0], [-1.0], [-1.0], [1.0]];
        let components = vec![
            rescaled(ComponentKind::NoiseBg, Part::Shared, a, 0.2),
            rescaled(ComponentKind::NoiseBg, Part::Independent, b, 0.3),
            rescaled(ComponentKind::GeneticBg, Part::Shared, c, 0.5),
        ];
        let report = compose_phenotype(&space, &components).unwrap().report;
        // three orthogonal unit-variance columns: each realises a third
        assert_abs_diff_eq!(report.component_realized(ComponentKind::NoiseBg), 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(report.component_budgeted(ComponentKind::NoiseBg), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(report.component_realized(ComponentKind::NoiseFixed), 0.0);
    }

    #[test]
    fn trait_correlation_is_pearson_per_column_pair() {
        let y = array![[1.0, 2.0, -1.0, 5.0], [2.0, 4.0, -2.0, 5.0], [3.0, 6.0, -3.0, 5.0]];
        let r = trait_correlation(&y);
        assert_eq!(r.dim(), (4, 4));
        assert_abs_diff_eq!(r[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r[[0, 1]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r[[2, 0]], -1.0, epsilon = 1e-12);
        // constant trait
        assert_eq!(r[[3, 0]], 0.0);
        assert_eq!(r[[3, 3]], 0.0);
    }
}
