//! Random survival forest.

use serde::{Deserialize, Serialize};

use super::{validate_times, Tree};
use crate::domain::{FeatureSpec, Outcome, ScaledFeatures};
use crate::ports::{interpolate_at, SurvivalCurve, SurvivalScorer};
use crate::RiskCalcError;

/// Exported parameters of a random survival forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsfParams {
    pub outcome: Outcome,
    pub feature_names: Vec<String>,
    pub unique_times: Vec<f64>,
    /// Leaves hold the survival curve of their training samples on `unique_times`
    pub trees: Vec<Tree<Vec<f64>>>,
}

/// Forest survival is the mean of the reached leaves' curves.
#[derive(Debug, Clone)]
pub struct RandomSurvivalForest {
    outcome: Outcome,
    spec: FeatureSpec,
    times: Vec<f64>,
    trees: Vec<Tree<Vec<f64>>>,
}

impl RandomSurvivalForest {
    /// Build a forest from exported parameters.
    ///
    /// # Errors
    /// Returns `RiskCalcError::Artifact` if the parameters are inconsistent.
    pub fn new(params: RsfParams) -> Result<Self, RiskCalcError> {
        let artifact = |e: String| RiskCalcError::Artifact(format!("random survival forest: {e}"));

        let spec = FeatureSpec::new(params.feature_names).map_err(artifact)?;
        validate_times(&params.unique_times).map_err(artifact)?;
        if params.trees.is_empty() {
            return Err(artifact("forest has no trees".into()));
        }

        let n_times = params.unique_times.len();
        for (k, tree) in params.trees.iter().enumerate() {
            tree.validate(spec.len(), |curve: &Vec<f64>| {
                if curve.len() != n_times {
                    return Err(format!(
                        "curve has {} values for {n_times} time points",
                        curve.len()
                    ));
                }
                if curve.iter().any(|s| !(0.0..=1.0).contains(s)) {
                    return Err("survival values must lie in [0, 1]".into());
                }
                Ok(())
            })
            .map_err(|e| artifact(format!("tree {k}: {e}")))?;
        }

        Ok(Self {
            outcome: params.outcome,
            spec,
            times: params.unique_times,
            trees: params.trees,
        })
    }

    /// Leaf curves reached by `x`, one per tree.
    fn leaves(&self, x: &ScaledFeatures) -> Result<Vec<&[f64]>, RiskCalcError> {
        if x.len() != self.spec.len() {
            return Err(RiskCalcError::Model(format!(
                "feature length mismatch: got {}, expected {}",
                x.len(),
                self.spec.len()
            )));
        }
        self.trees
            .iter()
            .map(|t| t.leaf(x.as_slice()).map(Vec::as_slice))
            .collect()
    }

    fn mean_at(leaves: &[&[f64]], i: usize) -> f64 {
        let sum: f64 = leaves.iter().map(|curve| curve[i]).sum();
        sum / leaves.len() as f64
    }
}

impl SurvivalScorer for RandomSurvivalForest {
    fn outcome(&self) -> Outcome {
        self.outcome
    }

    fn feature_spec(&self) -> &FeatureSpec {
        &self.spec
    }

    fn survival_curve(&self, x: &ScaledFeatures) -> Result<SurvivalCurve, RiskCalcError> {
        let leaves = self.leaves(x)?;
        let survival = (0..self.times.len())
            .map(|i| Self::mean_at(&leaves, i))
            .collect();
        SurvivalCurve::new(self.times.clone(), survival).map_err(RiskCalcError::Model)
    }

    fn survival_at(&self, x: &ScaledFeatures, horizon: f64) -> Result<f64, RiskCalcError> {
        let leaves = self.leaves(x)?;
        let s = interpolate_at(&self.times, horizon, |i| Self::mean_at(&leaves, i))
            .ok_or_else(|| RiskCalcError::Model("forest has no time points".into()))?;
        Ok(s.clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::forest::Node;

    fn split(feature: usize, low: Vec<f64>, high: Vec<f64>) -> Tree<Vec<f64>> {
        Tree {
            nodes: vec![
                Node::Split {
                    feature,
                    threshold: 0.0,
                    left: 1,
                    right: 2,
                },
                Node::Leaf(low),
                Node::Leaf(high),
            ],
        }
    }

    fn params() -> RsfParams {
        RsfParams {
            outcome: Outcome::Cardiovascular,
            feature_names: vec!["Age".into(), "SBP".into()],
            unique_times: vec![60.0, 240.0],
            trees: vec![
                split(0, vec![0.99, 0.9], vec![0.95, 0.6]),
                split(1, vec![0.98, 0.8], vec![0.9, 0.5]),
            ],
        }
    }

    #[test]
    fn test_mean_of_leaf_curves() {
        let forest = RandomSurvivalForest::new(params()).expect("valid forest");
        let x = ScaledFeatures::new(vec![1.0, -1.0]);

        let curve = forest.survival_curve(&x).expect("curve");
        assert!((curve.survival()[1] - 0.7).abs() < 1e-12);
        assert_eq!(forest.survival_at(&x, 240.0).expect("survival"), curve.at(240.0));
        assert_eq!(forest.survival_at(&x, 150.0).expect("survival"), curve.at(150.0));
    }

    #[test]
    fn test_rejects_curve_length_mismatch() {
        let mut p = params();
        p.trees.push(split(0, vec![0.9], vec![0.8]));
        let err = RandomSurvivalForest::new(p).expect_err("bad leaf");
        assert!(err.to_string().contains("tree 2"));
    }

    #[test]
    fn test_rejects_out_of_range_survival() {
        let mut p = params();
        p.trees.push(split(0, vec![1.2, 0.9], vec![0.9, 0.8]));
        assert!(RandomSurvivalForest::new(p).is_err());
    }
}
