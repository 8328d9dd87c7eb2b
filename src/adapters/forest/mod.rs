//! Tree-ensemble survival model adapter.
//!
//! Implements [`SurvivalScorer`] for the two model families exported by the
//! training pipeline:
//! - `gradient_boosted_survival`: Cox-loss gradient boosting with a Breslow
//!   baseline cumulative hazard
//! - `random_survival_forest`: leaves hold survival curves averaged across trees
//!
//! # Model file format
//!
//! Each model is a JSON document tagged by `kind`. Trees are flat node lists
//! in pre-order; node 0 is the root and every child index is greater than its
//! parent's. A split sends `x[feature] <= threshold` to `left`.
//!
//! ```json
//! {"kind": "random_survival_forest", "outcome": "cardiovascular",
//!  "feature_names": ["Age"], "unique_times": [12.0, 240.0],
//!  "trees": [{"nodes": [
//!     {"split": {"feature": 0, "threshold": 0.0, "left": 1, "right": 2}},
//!     {"leaf": [0.99, 0.9]},
//!     {"leaf": [0.95, 0.6]}]}]}
//! ```

mod gbsa;
mod rsf;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::domain::Outcome;
use crate::ports::SurvivalScorer;
use crate::RiskCalcError;

pub use gbsa::{GbsaParams, GradientBoostedSurvival};
pub use rsf::{RandomSurvivalForest, RsfParams};

/// A tree node: an axis-aligned split or a leaf payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node<L> {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf(L),
}

/// A decision tree stored as a flat pre-order node list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree<L> {
    pub nodes: Vec<Node<L>>,
}

impl<L> Tree<L> {
    /// Check structure against the model's feature count.
    ///
    /// Requiring children to come after their parent rules out cycles, so
    /// traversal of a validated tree always terminates.
    ///
    /// # Errors
    /// Returns a description of the first structural problem found.
    pub fn validate(
        &self,
        n_features: usize,
        check_leaf: impl Fn(&L) -> Result<(), String>,
    ) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".into());
        }
        let n = self.nodes.len();
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= n_features {
                        return Err(format!(
                            "node {i} splits on feature {feature}, model has {n_features}"
                        ));
                    }
                    if threshold.is_nan() {
                        return Err(format!("node {i} has a NaN threshold"));
                    }
                    for &child in [left, right] {
                        if child <= i || child >= n {
                            return Err(format!("node {i} has invalid child index {child}"));
                        }
                    }
                }
                Node::Leaf(payload) => {
                    check_leaf(payload).map_err(|e| format!("leaf {i}: {e}"))?;
                }
            }
        }
        Ok(())
    }

    /// Follow splits from the root to the leaf reached by `x`.
    ///
    /// # Errors
    /// Returns `RiskCalcError::Model` on a malformed tree or a short input.
    pub fn leaf(&self, x: &[f64]) -> Result<&L, RiskCalcError> {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf(payload)) => return Ok(payload),
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let v = x.get(*feature).ok_or_else(|| {
                        RiskCalcError::Model(format!("input has no feature index {feature}"))
                    })?;
                    let next = if *v <= *threshold { *left } else { *right };
                    if next <= idx {
                        return Err(RiskCalcError::Model(format!(
                            "tree node {idx} points backwards to {next}"
                        )));
                    }
                    idx = next;
                }
                None => {
                    return Err(RiskCalcError::Model(format!(
                        "tree node index {idx} out of range"
                    )))
                }
            }
        }
    }
}

/// Time grid shared by all curves of a model.
fn validate_times(times: &[f64]) -> Result<(), String> {
    if times.is_empty() {
        return Err("unique_times is empty".into());
    }
    if times.iter().any(|t| !t.is_finite()) {
        return Err("unique_times contains non-finite values".into());
    }
    if times.windows(2).any(|w| w[0] >= w[1]) {
        return Err("unique_times must be strictly increasing".into());
    }
    Ok(())
}

/// A model file on disk, tagged by model family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelFile {
    GradientBoostedSurvival(GbsaParams),
    RandomSurvivalForest(RsfParams),
}

impl ModelFile {
    fn outcome(&self) -> Outcome {
        match self {
            Self::GradientBoostedSurvival(p) => p.outcome,
            Self::RandomSurvivalForest(p) => p.outcome,
        }
    }

    /// Validate and turn into a scorer.
    ///
    /// # Errors
    /// Returns `RiskCalcError::Artifact` if the parameters are inconsistent.
    pub fn into_scorer(self) -> Result<Arc<dyn SurvivalScorer>, RiskCalcError> {
        Ok(match self {
            Self::GradientBoostedSurvival(p) => Arc::new(GradientBoostedSurvival::new(p)?),
            Self::RandomSurvivalForest(p) => Arc::new(RandomSurvivalForest::new(p)?),
        })
    }
}

// `.gz` files are decompressed in memory.
fn read_model(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut content = String::new();
    if path.extension().is_some_and(|ext| ext == "gz") {
        GzDecoder::new(file).read_to_string(&mut content)?;
    } else {
        BufReader::new(file).read_to_string(&mut content)?;
    }
    Ok(content)
}

/// Load a model file (plain or gzip-compressed JSON) and check that it
/// predicts `expected`.
///
/// # Errors
/// Returns `RiskCalcError::Artifact` if the file is unreadable, malformed, or
/// for the wrong outcome.
pub fn load_scorer(
    path: &Path,
    expected: Outcome,
) -> Result<Arc<dyn SurvivalScorer>, RiskCalcError> {
    let content = read_model(path).map_err(|e| {
        RiskCalcError::Artifact(format!("failed to read model {}: {e}", path.display()))
    })?;
    let file: ModelFile = serde_json::from_str(&content).map_err(|e| {
        RiskCalcError::Artifact(format!("invalid model {}: {e}", path.display()))
    })?;

    if file.outcome() != expected {
        return Err(RiskCalcError::Artifact(format!(
            "{} holds a {} model, expected {}",
            path.display(),
            file.outcome(),
            expected
        )));
    }

    let scorer = file.into_scorer()?;
    tracing::info!(
        "Loaded {} model from {:?} (n_features={})",
        expected,
        path,
        scorer.feature_spec().len()
    );
    Ok(scorer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump() -> Tree<f64> {
        Tree {
            nodes: vec![
                Node::Split {
                    feature: 0,
                    threshold: 0.5,
                    left: 1,
                    right: 2,
                },
                Node::Leaf(-1.0),
                Node::Leaf(1.0),
            ],
        }
    }

    #[test]
    fn test_traversal_goes_left_on_equal() {
        let t = stump();
        assert_eq!(*t.leaf(&[0.5]).expect("leaf"), -1.0);
        assert_eq!(*t.leaf(&[0.6]).expect("leaf"), 1.0);
    }

    #[test]
    fn test_validate_rejects_backward_child() {
        let t = Tree {
            nodes: vec![
                Node::Split {
                    feature: 0,
                    threshold: 0.0,
                    left: 0,
                    right: 1,
                },
                Node::Leaf(0.0),
            ],
        };
        assert!(t.validate(1, |_| Ok(())).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_feature() {
        assert!(stump().validate(0, |_| Ok(())).is_err());
        assert!(stump().validate(1, |_| Ok(())).is_ok());
    }

    #[test]
    fn test_short_input_is_model_error() {
        let err = stump().leaf(&[]).expect_err("short input");
        assert!(matches!(err, RiskCalcError::Model(_)));
    }

    #[test]
    fn test_node_json_shape() {
        let json = r#"{"nodes":[{"split":{"feature":0,"threshold":1.5,"left":1,"right":2}},{"leaf":0.1},{"leaf":0.2}]}"#;
        let t: Tree<f64> = serde_json::from_str(json).expect("parse tree");
        assert_eq!(t.nodes.len(), 3);
        assert_eq!(*t.leaf(&[2.0]).expect("leaf"), 0.2);
    }

    #[test]
    fn test_read_model_decompresses_gz() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("model.json.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"{\"kind\":\"x\"}").expect("compress");
        std::fs::write(&path, encoder.finish().expect("finish")).expect("write");

        assert_eq!(read_model(&path).expect("read gz"), "{\"kind\":\"x\"}");
    }
}
