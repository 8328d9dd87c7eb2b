//! Sampling Shapley-value explainer.
//!
//! Estimates interventional SHAP values for one prediction: for each selected
//! background row and each sampled feature ordering, features are switched
//! from the background value to the patient value one at a time and each is
//! credited with the change in predicted risk. Every ordering telescopes to
//! `f(x) - f(row)`, so averaged attributions add up exactly to
//! `prediction - base_value`.
//!
//! Orderings are drawn antithetically (each permutation is followed by its
//! reverse) from a ChaCha RNG seeded per request, so the same input always
//! yields bit-identical attributions.

use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::domain::{
    Attribution, AttributionSet, BackgroundSet, PatientFeatures, ScaledFeatures,
};
use crate::ports::{Explainer, SurvivalScorer};
use crate::RiskCalcError;

/// Default number of orderings per background row.
pub const DEFAULT_PERMUTATIONS: usize = 8;

/// Default number of background rows per explanation.
pub const DEFAULT_MAX_BACKGROUND: usize = 50;

/// Default RNG seed.
pub const DEFAULT_SEED: u64 = 42;

/// Permutation-sampling explainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermutationExplainer {
    permutations: usize,
    max_background: usize,
    seed: u64,
}

impl Default for PermutationExplainer {
    fn default() -> Self {
        Self::new(DEFAULT_PERMUTATIONS, DEFAULT_MAX_BACKGROUND, DEFAULT_SEED)
    }
}

impl PermutationExplainer {
    /// Create an explainer.
    ///
    /// `permutations` is rounded up to an even count of at least 2 (orderings
    /// come in antithetic pairs); `max_background` is at least 1.
    #[must_use]
    pub fn new(permutations: usize, max_background: usize, seed: u64) -> Self {
        Self {
            permutations: permutations.max(1).div_ceil(2) * 2,
            max_background: max_background.max(1),
            seed,
        }
    }

    #[must_use]
    pub fn permutations(&self) -> usize {
        self.permutations
    }

    #[must_use]
    pub fn max_background(&self) -> usize {
        self.max_background
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Background rows to use, in ascending order.
    fn select_rows(&self, available: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
        if available <= self.max_background {
            return (0..available).collect();
        }
        let mut picked = index::sample(rng, available, self.max_background).into_vec();
        picked.sort_unstable();
        picked
    }

    /// Walk one ordering from `row` to `x`, adding marginal changes to `phi`.
    #[allow(clippy::too_many_arguments)]
    fn walk(
        scorer: &dyn SurvivalScorer,
        x: &[f64],
        row: &[f64],
        order: &[usize],
        f_row: f64,
        prediction: f64,
        horizon: f64,
        phi: &mut [f64],
    ) -> Result<(), RiskCalcError> {
        let mut current = ScaledFeatures::new(row.to_vec());
        let mut previous = f_row;
        let last = order.len() - 1;
        for (step, &j) in order.iter().enumerate() {
            current.set(j, x[j]);
            // Once every feature is switched the input equals x.
            let f = if step == last {
                prediction
            } else {
                scorer.risk_at(&current, horizon)?
            };
            phi[j] += f - previous;
            previous = f;
        }
        Ok(())
    }
}

impl Explainer for PermutationExplainer {
    fn explain(
        &self,
        scorer: &dyn SurvivalScorer,
        background: &BackgroundSet,
        patient: &PatientFeatures,
        scaled: &ScaledFeatures,
        horizon: f64,
    ) -> Result<AttributionSet, RiskCalcError> {
        let spec = scorer.feature_spec();
        if background.spec() != spec {
            return Err(RiskCalcError::Explainer(format!(
                "background columns do not match the {} model features",
                scorer.outcome()
            )));
        }
        if background.is_empty() {
            return Err(RiskCalcError::Explainer(format!(
                "background set for {} has no rows",
                scorer.outcome()
            )));
        }
        if scaled.len() != spec.len() {
            return Err(RiskCalcError::Explainer(format!(
                "input has {} features, model expects {}",
                scaled.len(),
                spec.len()
            )));
        }

        let n = spec.len();
        let x = scaled.as_slice();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let rows = self.select_rows(background.len(), &mut rng);

        let prediction = scorer.risk_at(scaled, horizon)?;
        let mut phi = vec![0.0; n];
        let mut base_sum = 0.0;
        let mut order: Vec<usize> = (0..n).collect();

        for &r in &rows {
            let row = background.row(r).ok_or_else(|| {
                RiskCalcError::Explainer(format!("background row {r} out of range"))
            })?;
            let f_row = scorer.risk_at(&ScaledFeatures::new(row.to_vec()), horizon)?;
            base_sum += f_row;

            for _ in 0..self.permutations / 2 {
                order.shuffle(&mut rng);
                Self::walk(scorer, x, row, &order, f_row, prediction, horizon, &mut phi)?;
                order.reverse();
                Self::walk(scorer, x, row, &order, f_row, prediction, horizon, &mut phi)?;
            }
        }

        let walks = (rows.len() * self.permutations) as f64;
        let base_value = base_sum / rows.len() as f64;

        let attributions = spec
            .names()
            .iter()
            .zip(phi)
            .map(|(name, total)| {
                let value = patient.get(name).ok_or_else(|| {
                    RiskCalcError::Explainer(format!("patient has no value for {name}"))
                })?;
                Ok(Attribution {
                    feature: name.clone(),
                    value,
                    contribution: total / walks,
                })
            })
            .collect::<Result<Vec<_>, RiskCalcError>>()?;

        tracing::debug!(
            "Explained {} prediction over {} background rows ({} orderings each)",
            scorer.outcome(),
            rows.len(),
            self.permutations
        );

        Ok(AttributionSet {
            outcome: scorer.outcome(),
            base_value,
            prediction,
            attributions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FeatureSpec, Outcome};
    use crate::ports::SurvivalCurve;

    /// Additive toy model: risk = 0.1 * x0 + 0.2 * x1 + 0.05 * x0 * x2, read off a flat curve.
    struct ToyScorer {
        spec: FeatureSpec,
    }

    impl ToyScorer {
        fn new() -> Self {
            Self {
                spec: FeatureSpec::new(vec!["a".into(), "b".into(), "c".into()]).expect("spec"),
            }
        }
    }

    impl SurvivalScorer for ToyScorer {
        fn outcome(&self) -> Outcome {
            Outcome::AllCause
        }

        fn feature_spec(&self) -> &FeatureSpec {
            &self.spec
        }

        fn survival_curve(&self, x: &ScaledFeatures) -> Result<SurvivalCurve, RiskCalcError> {
            let v = x.as_slice();
            let risk = 0.1 * v[0] + 0.2 * v[1] + 0.05 * v[0] * v[2];
            SurvivalCurve::new(vec![240.0], vec![1.0 - risk]).map_err(RiskCalcError::Model)
        }
    }

    fn background(rows: Vec<Vec<f64>>) -> BackgroundSet {
        BackgroundSet::from_rows(
            Outcome::AllCause,
            FeatureSpec::new(vec!["a".into(), "b".into(), "c".into()]).expect("spec"),
            rows,
        )
        .expect("background")
    }

    fn patient() -> (PatientFeatures, ScaledFeatures) {
        let spec = FeatureSpec::new(vec!["a".into(), "b".into(), "c".into()]).expect("spec");
        let p = PatientFeatures::from_values(&spec, vec![2.0, 1.0, 1.0]).expect("values");
        (p, ScaledFeatures::new(vec![2.0, 1.0, 1.0]))
    }

    #[test]
    fn test_attributions_sum_to_prediction_minus_base() {
        let scorer = ToyScorer::new();
        let bg = background(vec![vec![0.0, 0.0, 0.0], vec![1.0, 0.5, 0.0], vec![0.5, 0.5, 1.0]]);
        let (p, x) = patient();

        let set = PermutationExplainer::default()
            .explain(&scorer, &bg, &p, &x, 240.0)
            .expect("explain");

        assert!(set.residual().abs() < 1e-9, "residual {}", set.residual());
        assert_eq!(set.attributions.len(), 3);
    }

    #[test]
    fn test_additive_features_get_exact_shares() {
        let scorer = ToyScorer::new();
        // c is zero in the background and the interaction needs both a and c,
        // so only the a/c split is order dependent.
        let bg = background(vec![vec![0.0, 0.0, 0.0]]);
        let (p, x) = patient();

        let set = PermutationExplainer::new(16, 10, 7)
            .explain(&scorer, &bg, &p, &x, 240.0)
            .expect("explain");

        let b = &set.attributions[1];
        assert_eq!(b.feature, "b");
        assert!((b.contribution - 0.2).abs() < 1e-9);
        assert!((set.base_value - 0.0).abs() < 1e-12);
        assert!((set.prediction - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_deterministic_for_same_seed() {
        let scorer = ToyScorer::new();
        let rows: Vec<Vec<f64>> = (0..80)
            .map(|i| vec![f64::from(i % 7) * 0.1, f64::from(i % 3) * 0.2, f64::from(i % 2)])
            .collect();
        let bg = background(rows);
        let (p, x) = patient();
        let explainer = PermutationExplainer::new(4, 20, 99);

        let first = explainer.explain(&scorer, &bg, &p, &x, 240.0).expect("explain");
        let second = explainer.explain(&scorer, &bg, &p, &x, 240.0).expect("explain");
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_background_is_error() {
        let scorer = ToyScorer::new();
        let (p, x) = patient();
        let err = PermutationExplainer::default()
            .explain(&scorer, &background(vec![]), &p, &x, 240.0)
            .expect_err("empty background");
        assert!(matches!(err, RiskCalcError::Explainer(_)));
    }

    #[test]
    fn test_permutations_rounded_to_pairs() {
        assert_eq!(PermutationExplainer::new(0, 0, 1).permutations(), 2);
        assert_eq!(PermutationExplainer::new(5, 0, 1).permutations(), 6);
        assert_eq!(PermutationExplainer::new(5, 0, 1).max_background(), 1);
    }
}
