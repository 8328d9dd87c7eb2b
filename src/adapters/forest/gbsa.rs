//! Gradient-boosted survival model (Cox partial-likelihood loss).

use serde::{Deserialize, Serialize};

use super::{validate_times, Tree};
use crate::domain::{FeatureSpec, Outcome, ScaledFeatures};
use crate::ports::{interpolate_at, SurvivalCurve, SurvivalScorer};
use crate::RiskCalcError;

/// Exported parameters of a gradient-boosted survival model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbsaParams {
    pub outcome: Outcome,
    pub feature_names: Vec<String>,
    pub unique_times: Vec<f64>,
    /// Breslow cumulative baseline hazard at each of `unique_times`
    pub baseline_cumulative_hazard: Vec<f64>,
    #[serde(default)]
    pub init_score: f64,
    pub learning_rate: f64,
    pub trees: Vec<Tree<f64>>,
}

/// `S(t | x) = exp(-H0(t) * exp(f(x)))` with
/// `f(x) = init_score + learning_rate * sum(tree(x))`.
#[derive(Debug, Clone)]
pub struct GradientBoostedSurvival {
    outcome: Outcome,
    spec: FeatureSpec,
    times: Vec<f64>,
    cumulative_hazard: Vec<f64>,
    init_score: f64,
    learning_rate: f64,
    trees: Vec<Tree<f64>>,
}

impl GradientBoostedSurvival {
    /// Build a model from exported parameters.
    ///
    /// # Errors
    /// Returns `RiskCalcError::Artifact` if the parameters are inconsistent.
    pub fn new(params: GbsaParams) -> Result<Self, RiskCalcError> {
        let artifact = |e: String| RiskCalcError::Artifact(format!("gradient boosted model: {e}"));

        let spec = FeatureSpec::new(params.feature_names).map_err(artifact)?;
        validate_times(&params.unique_times).map_err(artifact)?;
        if params.baseline_cumulative_hazard.len() != params.unique_times.len() {
            return Err(artifact(format!(
                "baseline_cumulative_hazard has {} values for {} time points",
                params.baseline_cumulative_hazard.len(),
                params.unique_times.len()
            )));
        }
        if params
            .baseline_cumulative_hazard
            .iter()
            .any(|h| !h.is_finite() || *h < 0.0)
        {
            return Err(artifact(
                "baseline_cumulative_hazard must be finite and non-negative".into(),
            ));
        }
        if !params.init_score.is_finite() || !params.learning_rate.is_finite() {
            return Err(artifact("init_score and learning_rate must be finite".into()));
        }
        if params.trees.is_empty() {
            return Err(artifact("model has no trees".into()));
        }
        for (k, tree) in params.trees.iter().enumerate() {
            tree.validate(spec.len(), |v: &f64| {
                if v.is_finite() {
                    Ok(())
                } else {
                    Err("leaf value is not finite".into())
                }
            })
            .map_err(|e| artifact(format!("tree {k}: {e}")))?;
        }

        Ok(Self {
            outcome: params.outcome,
            spec,
            times: params.unique_times,
            cumulative_hazard: params.baseline_cumulative_hazard,
            init_score: params.init_score,
            learning_rate: params.learning_rate,
            trees: params.trees,
        })
    }

    fn check_input(&self, x: &ScaledFeatures) -> Result<(), RiskCalcError> {
        if x.len() != self.spec.len() {
            return Err(RiskCalcError::Model(format!(
                "feature length mismatch: got {}, expected {}",
                x.len(),
                self.spec.len()
            )));
        }
        Ok(())
    }

    /// Log relative hazard `f(x)`.
    ///
    /// # Errors
    /// Returns `RiskCalcError::Model` if the input does not fit the model.
    pub fn raw_score(&self, x: &ScaledFeatures) -> Result<f64, RiskCalcError> {
        self.check_input(x)?;
        let mut sum = 0.0;
        for tree in &self.trees {
            sum += *tree.leaf(x.as_slice())?;
        }
        Ok(self.init_score + self.learning_rate * sum)
    }

    fn survival_from(&self, relative_hazard: f64, i: usize) -> f64 {
        (-self.cumulative_hazard[i] * relative_hazard).exp()
    }
}

impl SurvivalScorer for GradientBoostedSurvival {
    fn outcome(&self) -> Outcome {
        self.outcome
    }

    fn feature_spec(&self) -> &FeatureSpec {
        &self.spec
    }

    fn survival_curve(&self, x: &ScaledFeatures) -> Result<SurvivalCurve, RiskCalcError> {
        let relative_hazard = self.raw_score(x)?.exp();
        let survival = (0..self.times.len())
            .map(|i| self.survival_from(relative_hazard, i))
            .collect();
        SurvivalCurve::new(self.times.clone(), survival).map_err(RiskCalcError::Model)
    }

    fn survival_at(&self, x: &ScaledFeatures, horizon: f64) -> Result<f64, RiskCalcError> {
        let relative_hazard = self.raw_score(x)?.exp();
        let s = interpolate_at(&self.times, horizon, |i| {
            self.survival_from(relative_hazard, i)
        })
        .ok_or_else(|| RiskCalcError::Model("model has no time points".into()))?;
        if s.is_nan() {
            return Err(RiskCalcError::Model(
                "survival probability is not a number".into(),
            ));
        }
        Ok(s.clamp(0.0, 1.0))
    }
}
